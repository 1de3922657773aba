//! On-disk constants of the Crimson (`CRIM`) layout.
//!
//! All integers are little-endian. Strings are UTF-16LE, NUL-terminated and prefixed by a `u32`
//! byte size that counts the prefix itself. A zero offset means "absent".

use std::fmt;

use bitflags::bitflags;

pub const DEFAULT_MAJOR_VERSION: u16 = 3;
pub const DEFAULT_MINOR_VERSION: u16 = 1;

pub(crate) const CRIM_HEADER_SIZE: usize = 16;
pub(crate) const PROVIDER_DESCRIPTOR_SIZE: usize = 20;
pub(crate) const WEVT_HEADER_SIZE: usize = 16;
pub(crate) const ELEMENT_DESCRIPTOR_SIZE: usize = 8;

/// `magic, u32 length, u32 count`, shared by every list block.
pub(crate) const LIST_HEADER_SIZE: usize = 12;

pub(crate) const CHANNEL_ENTRY_SIZE: usize = 16;
pub(crate) const LEVEL_ENTRY_SIZE: usize = 12;
pub(crate) const OPCODE_ENTRY_SIZE: usize = 12;
pub(crate) const TASK_ENTRY_SIZE: usize = 28;
pub(crate) const KEYWORD_ENTRY_SIZE: usize = 16;
pub(crate) const FILTER_ENTRY_SIZE: usize = 20;
pub(crate) const EVENT_ENTRY_SIZE: usize = 48;
pub(crate) const MAP_HEADER_SIZE: usize = 20;
pub(crate) const MAP_ITEM_SIZE: usize = 8;
pub(crate) const TEMPLATE_HEADER_SIZE: usize = 40;
pub(crate) const PROPERTY_ENTRY_SIZE: usize = 20;
pub(crate) const QUERY_HEADER_SIZE: usize = 20;
pub(crate) const QUERY_ITEM_SIZE: usize = 8;

/// The event list is the only block with alignment padding in front of it.
pub(crate) const EVENT_ALIGNMENT: usize = 8;

pub(crate) const SIG_CRIM: [u8; 4] = *b"CRIM";
pub(crate) const SIG_WEVT: [u8; 4] = *b"WEVT";
pub(crate) const SIG_VMAP: [u8; 4] = *b"VMAP";
pub(crate) const SIG_BMAP: [u8; 4] = *b"BMAP";
pub(crate) const SIG_TEMP: [u8; 4] = *b"TEMP";
pub(crate) const SIG_QUER: [u8; 4] = *b"QUER";

/// A 4-byte block tag, printed as text when it is printable ASCII.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 4]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            for &b in &self.0 {
                write!(f, "{}", char::from(b))?;
            }
            Ok(())
        } else {
            write!(f, "{:02x?}", self.0)
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Sub-list kinds of a provider block, identified by the tag stored in the WEVT offset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Level,
    Task,
    Opcode,
    Keyword,
    Event,
    Channel,
    Maps,
    Template,
    NamedQueries,
    Filter,
}

impl ElementKind {
    /// Order in which the writer lays out sub-lists. Definitions precede their users.
    pub(crate) const WRITE_ORDER: [ElementKind; 10] = [
        ElementKind::Channel,
        ElementKind::Maps,
        ElementKind::NamedQueries,
        ElementKind::Template,
        ElementKind::Opcode,
        ElementKind::Level,
        ElementKind::Task,
        ElementKind::Keyword,
        ElementKind::Event,
        ElementKind::Filter,
    ];

    pub fn tag(self) -> u32 {
        match self {
            ElementKind::Level => 0,
            ElementKind::Task => 1,
            ElementKind::Opcode => 2,
            ElementKind::Keyword => 3,
            ElementKind::Event => 4,
            ElementKind::Channel => 5,
            ElementKind::Maps => 6,
            ElementKind::Template => 7,
            ElementKind::NamedQueries => 8,
            ElementKind::Filter => 9,
        }
    }

    pub fn from_tag(tag: u32) -> Option<ElementKind> {
        match tag {
            0 => Some(ElementKind::Level),
            1 => Some(ElementKind::Task),
            2 => Some(ElementKind::Opcode),
            3 => Some(ElementKind::Keyword),
            4 => Some(ElementKind::Event),
            5 => Some(ElementKind::Channel),
            6 => Some(ElementKind::Maps),
            7 => Some(ElementKind::Template),
            8 => Some(ElementKind::NamedQueries),
            9 => Some(ElementKind::Filter),
            _ => None,
        }
    }

    pub fn signature(self) -> [u8; 4] {
        match self {
            ElementKind::Level => *b"LEVL",
            ElementKind::Task => *b"TASK",
            ElementKind::Opcode => *b"OPCO",
            ElementKind::Keyword => *b"KEYW",
            ElementKind::Event => *b"EVNT",
            ElementKind::Channel => *b"CHAN",
            ElementKind::Maps => *b"MAPS",
            ElementKind::Template => *b"TTBL",
            ElementKind::NamedQueries => *b"QTAB",
            ElementKind::Filter => *b"FLTR",
        }
    }

    /// Lists that are written even when they have no entries.
    pub(crate) fn always_written(self) -> bool {
        matches!(
            self,
            ElementKind::Opcode | ElementKind::Level | ElementKind::Task | ElementKind::Keyword
        )
    }

    /// Reading rank: blocks are parsed after every block they can reference.
    pub(crate) fn read_rank(self) -> u8 {
        match self {
            ElementKind::Template => 1,
            ElementKind::Event | ElementKind::Filter => 2,
            _ => 0,
        }
    }
}

bitflags! {
    /// Flags of a 20-byte property entry (TDH `PROPERTY_FLAGS` values).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u32 {
        const STRUCT = 0x01;
        const PARAM_LENGTH = 0x02;
        const PARAM_COUNT = 0x04;
        const WBEM_XML_FRAGMENT = 0x08;
        const FIXED_LENGTH = 0x10;
        const FIXED_COUNT = 0x20;
    }
}

bitflags! {
    /// Flags of a `TEMP` record: which kind of payload its BinXml describes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TemplateFlags: u32 {
        const EVENT_DATA = 0x01;
        const USER_DATA = 0x02;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in ElementKind::WRITE_ORDER {
            assert_eq!(ElementKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ElementKind::from_tag(10), None);
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(Signature(*b"LEVL").to_string(), "LEVL");
        assert_eq!(Signature([0, 1, 2, 3]).to_string(), "[00, 01, 02, 03]");
    }
}
