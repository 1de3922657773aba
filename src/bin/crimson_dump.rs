use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indoc::indoc;
use log::LevelFilter;
use serde::Serialize;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use crimson::model::Provider;
use crimson::{ManifestReader, ManifestWriter, MessageTable, ReaderSettings, WriterSettings};

fn command() -> Command {
    Command::new("crimson_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Decode a Crimson (CRIM) event manifest blob and print it as JSON")
        .long_about(indoc!(r#"
            Decode a Crimson (CRIM) event manifest blob and print it as JSON.

            The blob is the payload of a `WEVT_TEMPLATE` resource. Message ids can be
            resolved to text by passing a JSON object mapping ids to strings, e.g.
            `{"2415919105": "Microsoft-Windows-Example"}`.

            With `--reencode`, the decoded providers are written back to a new blob,
            which is useful to check that a blob survives a decode/encode round trip.
        "#))
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("BLOB")
                .help("Path to the CRIM blob."),
        )
        .arg(
            Arg::new("messages")
                .long("messages")
                .short('m')
                .value_name("JSON")
                .help("JSON file mapping message ids to text."),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("PATH")
                .help("Write the JSON to this file instead of stdout."),
        )
        .arg(
            Arg::new("reencode")
                .long("reencode")
                .value_name("PATH")
                .help("Re-encode the decoded providers into a new blob at this path."),
        )
        .arg(
            Arg::new("no-length-check")
                .long("no-length-check")
                .action(ArgAction::SetTrue)
                .help("Do not fail when a block's recorded length differs from its contents."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help(indoc!("Sets debug prints level for the application:
                -v   - info
                -vv  - debug
                -vvv - trace
                NOTE: trace output is only available in debug builds, as it is extremely verbose")),
        )
}

#[derive(Serialize)]
struct DiagnosticOutput {
    offset: u32,
    message: String,
}

#[derive(Serialize)]
struct DumpOutput<'a> {
    version: String,
    providers: &'a [Provider],
    diagnostics: Vec<DiagnosticOutput>,
}

fn init_logging(matches: &ArgMatches) -> Result<()> {
    let level = match matches.get_count("verbose") {
        0 => return Ok(()),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3 => LevelFilter::Trace,
        _ => {
            eprintln!("using more than -vvv does not affect verbosity level");
            LevelFilter::Trace
        }
    };

    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("failed to initialize logging")
}

fn load_messages(matches: &ArgMatches) -> Result<MessageTable> {
    let Some(path) = matches.get_one::<String>("messages") else {
        return Ok(MessageTable::new());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read message table `{path}`"))?;
    serde_json::from_str(&text).with_context(|| format!("invalid message table `{path}`"))
}

fn run(matches: &ArgMatches) -> Result<()> {
    init_logging(matches)?;

    let input = PathBuf::from(
        matches
            .get_one::<String>("input")
            .context("missing input path")?,
    );
    if !input.is_file() {
        bail!("input `{}` is not a file", input.display());
    }
    let blob = fs::read(&input).with_context(|| format!("failed to read `{}`", input.display()))?;

    let settings = ReaderSettings::new()
        .messages(load_messages(matches)?)
        .validate_lengths(!matches.get_flag("no-length-check"));
    let manifest = ManifestReader::new(settings)
        .read(&blob)
        .with_context(|| format!("failed to decode `{}`", input.display()))?;

    let output = DumpOutput {
        version: format!("{}.{}", manifest.major_version, manifest.minor_version),
        providers: &manifest.providers,
        diagnostics: manifest
            .diagnostics
            .iter()
            .map(|d| DiagnosticOutput {
                offset: d.offset,
                message: d.error.to_string(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&output).context("failed to serialize manifest")?;

    match matches.get_one::<String>("output") {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write `{path}`"))?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}").context("failed to write to stdout")?;
        }
    }

    if let Some(path) = matches.get_one::<String>("reencode") {
        let writer = ManifestWriter::new(
            WriterSettings::new().version(manifest.major_version, manifest.minor_version),
        );
        let reencoded = writer
            .write(&manifest.providers)
            .context("failed to re-encode providers")?;
        fs::write(path, &reencoded).with_context(|| format!("failed to write `{path}`"))?;
        log::info!("re-encoded {} bytes into `{}`", reencoded.len(), path);
    }

    Ok(())
}

fn main() -> Result<()> {
    let matches = command().get_matches();
    run(&matches)
}
