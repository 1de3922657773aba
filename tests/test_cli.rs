mod fixtures;

use fixtures::*;

use assert_cmd::prelude::*;
use crimson::{MessageTable, write_manifest};
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn write_sample_blob(dir: &std::path::Path) -> (std::path::PathBuf, Vec<u8>) {
    let blob = write_manifest(&[sample_provider(), other_provider()]).unwrap();
    let path = dir.join("sample.crim");
    fs::write(&path, &blob).unwrap();
    (path, blob)
}

#[test]
fn test_it_prints_providers_as_json() {
    let d = tempdir().unwrap();
    let (blob, _) = write_sample_blob(d.path());

    let mut cmd = Command::new(assert_cmd::cargo_bin!("crimson_dump"));
    cmd.arg(&blob);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("8E598056-8993-11D2-819E-0000F875A064"))
        .stdout(predicate::str::contains("\"version\": \"3.1\""))
        .stdout(predicate::str::contains("Crimson-Sample/Operational"));
}

#[test]
fn test_it_resolves_messages_from_a_table() {
    let d = tempdir().unwrap();
    let (blob, _) = write_sample_blob(d.path());

    let messages = MessageTable::from_providers(&[sample_provider()]);
    let messages_path = d.path().join("messages.json");
    fs::write(&messages_path, serde_json::to_string(&messages).unwrap()).unwrap();

    let out = d.path().join("dump.json");
    let mut cmd = Command::new(assert_cmd::cargo_bin!("crimson_dump"));
    cmd.arg(&blob)
        .arg("--messages")
        .arg(&messages_path)
        .arg("-o")
        .arg(&out);

    assert!(
        cmd.output().unwrap().stdout.is_empty(),
        "Expected output to be printed to file, but was printed to stdout"
    );

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(json["providers"][0]["name"], "Crimson-Sample-Provider");
    assert_eq!(json["diagnostics"].as_array().unwrap().len(), 0);
}

#[test]
fn test_reencoded_blob_is_identical() {
    let d = tempdir().unwrap();
    let (blob, original) = write_sample_blob(d.path());
    let reencoded = d.path().join("reencoded.crim");

    let mut cmd = Command::new(assert_cmd::cargo_bin!("crimson_dump"));
    cmd.arg(&blob).arg("--reencode").arg(&reencoded);
    cmd.assert().success();

    assert_eq!(fs::read(&reencoded).unwrap(), original);
}

#[test]
fn test_it_fails_on_a_corrupted_blob() {
    let d = tempdir().unwrap();
    let path = d.path().join("broken.crim");
    fs::write(&path, b"CRIX\x10\0\0\0\x03\0\x01\0\0\0\0\0").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo_bin!("crimson_dump"));
    cmd.arg(&path);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid signature at offset 0"));
}

#[test]
fn test_it_fails_on_a_missing_input() {
    let d = tempdir().unwrap();
    let mut cmd = Command::new(assert_cmd::cargo_bin!("crimson_dump"));
    cmd.arg(d.path().join("missing.crim"));

    cmd.assert().failure();
}
