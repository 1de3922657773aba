use thiserror::Error;

use super::format::Signature;
use super::offsets::{ObjectKind, ObjectRef, OffsetIndexError};
use crate::binxml::BinXmlError;
use crate::guid::Guid;
use crate::model::ModelError;

/// Fatal errors while decoding a blob.
#[derive(Debug, Error)]
pub enum ManifestReadError {
    #[error("invalid signature at offset {offset}: expected {expected}, found {found}")]
    InvalidSignature {
        offset: u32,
        expected: Signature,
        found: Signature,
    },

    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u32,
        need: usize,
        have: usize,
    },

    #[error("offset {offset} out of bounds for {what} (len={len})")]
    OffsetOutOfBounds {
        what: &'static str,
        offset: u32,
        len: usize,
    },

    #[error("size {size} out of bounds for {what} at offset {offset}")]
    SizeOutOfBounds {
        what: &'static str,
        offset: u32,
        size: u32,
    },

    #[error("invalid count {count} for {what} at offset {offset}")]
    CountOutOfBounds {
        what: &'static str,
        offset: u32,
        count: u32,
    },

    #[error("value {value} does not fit {what} at offset {offset}")]
    ValueOutOfRange {
        what: &'static str,
        offset: u32,
        value: u64,
    },

    #[error("invalid utf-16 string for {what} at offset {offset}")]
    InvalidUtf16String { what: &'static str, offset: u32 },

    #[error("unknown element kind tag {tag} at offset {offset}")]
    UnknownElementKind { offset: u32, tag: u32 },

    #[error("provider at offset {offset} lists the {signature} block more than once")]
    DuplicateElement { offset: u32, signature: Signature },

    #[error("{what} length mismatch at offset {offset}: recorded {recorded}, consumed {consumed}")]
    LengthMismatch {
        what: &'static str,
        offset: u32,
        recorded: u32,
        consumed: u64,
    },

    #[error("{what} at offset {offset} refers to offset {target}, which holds no record")]
    UnresolvedReference {
        what: &'static str,
        offset: u32,
        target: u32,
    },

    #[error("{what} at offset {offset} refers to offset {target}: expected a {expected}, found a {found}")]
    UnexpectedReferenceKind {
        what: &'static str,
        offset: u32,
        target: u32,
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("opcode at offset {offset} is scoped to task value {task}, which is not defined")]
    UnknownOpcodeTask { offset: u32, task: u16 },

    #[error("struct property at offset {offset} does not own the next member range")]
    InvalidStructMembers { offset: u32 },

    #[error("struct member at offset {offset} is itself a struct")]
    NestedStruct { offset: u32 },

    #[error("BinXml fragment at offset {offset}: {source}")]
    BinXml {
        offset: u32,
        #[source]
        source: BinXmlError,
    },

    #[error(transparent)]
    OffsetIndex(#[from] OffsetIndexError),
}

/// Errors while encoding an object graph.
#[derive(Debug, Error)]
pub enum ManifestWriteError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{object} is referenced before it was written")]
    UnwrittenObject { object: ObjectRef },

    #[error("blob would exceed 4 GiB ({size} bytes)")]
    BlobTooLarge { size: usize },

    #[error("{what} value {value} does not fit its field")]
    ValueOutOfRange { what: &'static str, value: usize },

    #[error(transparent)]
    OffsetIndex(#[from] OffsetIndexError),

    #[error(transparent)]
    BinXml(#[from] BinXmlError),
}

/// Recoverable schema problems found while reading; reported as diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("property `{property}` has a variable {field} referring to entry {target}, which is not a data sibling")]
    InvalidPropertyReference {
        property: String,
        field: &'static str,
        target: u16,
    },

    #[error("stored template identity {stored} matches no known scheme")]
    TemplateIdentityMismatch { stored: Guid },

    #[error("template payload does not describe its properties: {detail}")]
    TemplateShapeMismatch { detail: String },
}

pub(crate) type Result<T> = std::result::Result<T, ManifestReadError>;
