//! Encoding and decoding of the Crimson (`CRIM`) manifest blob.
//!
//! A blob holds one `WEVT` block per provider. Each provider block carries a table of
//! `(kind tag, offset)` pairs pointing at its sub-lists (`CHAN`, `LEVL`, `OPCO`, `TASK`, `KEYW`,
//! `MAPS`, `QTAB`, `TTBL`, `EVNT`, `FLTR`). Records refer to each other only by absolute byte
//! offsets within the blob.
//!
//! This module is split into:
//! - `format`: block signatures, fixed sizes, kind tags and flag sets
//! - `offsets`: the offset <-> object index used by both directions
//! - `writer`: object graph to bytes, with reserve-then-patch headers (`buffer`)
//! - `reader`: bytes to object graph, with bounds checks (`util`) and diagnostics
//! - `error`: fatal read/write errors and recoverable schema diagnostics

mod buffer;
mod error;
mod format;
mod offsets;
mod reader;
mod util;
mod writer;

pub use self::error::{ManifestReadError, ManifestWriteError, SchemaError};
pub use self::format::{
    DEFAULT_MAJOR_VERSION, DEFAULT_MINOR_VERSION, ElementKind, PropertyFlags, Signature,
    TemplateFlags,
};
pub use self::offsets::{ObjectKind, ObjectRef, OffsetIndex, OffsetIndexError, Referent};
pub use self::reader::{
    Diagnostic, ManifestReader, ReadManifest, ReaderSettings, read_manifest,
};
pub use self::writer::{ManifestWriter, WriterSettings, write_manifest};
