//! BinXml adapter.
//!
//! Templates carry the shape of their event payload as a BinXml fragment. The writer and reader
//! only talk to the [`BinXmlCodec`] trait; [`InlineNameCodec`] is the built-in implementation of
//! the WEVT "inline-name" dialect, where element and attribute names are stored inline (hash,
//! character count, UTF-16 text) instead of through a chunk string table.

mod codec;
mod document;
mod name;
mod tokens;

use thiserror::Error;

pub use self::codec::{BinXmlCodec, InlineNameCodec, MAX_DEPTH};
pub use self::document::{XmlAttribute, XmlElement, XmlNode};
pub use self::name::name_hash;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinXmlError {
    #[error("BinXml fragment truncated while reading {what} at offset {offset}")]
    Truncated { what: &'static str, offset: usize },

    #[error("unexpected BinXml token {token:#04x} at offset {offset} (expected {expected})")]
    UnexpectedToken {
        token: u8,
        offset: usize,
        expected: &'static str,
    },

    #[error("name hash mismatch for `{name}` at offset {offset}: stored {stored:#06x}, computed {computed:#06x}")]
    NameHashMismatch {
        name: String,
        offset: usize,
        stored: u16,
        computed: u16,
    },

    #[error("{what} size mismatch at offset {offset}: recorded {recorded}, actual {actual}")]
    SizeMismatch {
        what: &'static str,
        offset: usize,
        recorded: u32,
        actual: usize,
    },

    #[error("invalid UTF-16 text at offset {offset}")]
    InvalidUtf16 { offset: usize },

    #[error("unsupported value type {value_type:#04x} at offset {offset}")]
    UnsupportedValueType { value_type: u8, offset: usize },

    #[error("`{name}` is too long to encode ({len} UTF-16 units)")]
    TooLong { name: String, len: usize },

    #[error("attribute `{name}` cannot contain an element")]
    ElementInAttribute { name: String },

    #[error("BinXml elements nested deeper than {max} levels at offset {offset}", max = codec::MAX_DEPTH)]
    TooDeep { offset: usize },

    #[error("{trailing} trailing bytes after the end of the BinXml fragment")]
    TrailingData { trailing: usize },

    #[error("failed to render XML: {0}")]
    Render(String),
}
