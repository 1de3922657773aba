//! Token bytes of the BinXml subset used by template fragments.

pub(crate) const END_OF_STREAM: u8 = 0x00;
pub(crate) const OPEN_START_ELEMENT: u8 = 0x01;
pub(crate) const CLOSE_START_ELEMENT: u8 = 0x02;
pub(crate) const CLOSE_EMPTY_ELEMENT: u8 = 0x03;
pub(crate) const END_ELEMENT: u8 = 0x04;
pub(crate) const VALUE: u8 = 0x05;
pub(crate) const ATTRIBUTE: u8 = 0x06;
pub(crate) const NORMAL_SUBSTITUTION: u8 = 0x0d;
pub(crate) const OPTIONAL_SUBSTITUTION: u8 = 0x0e;
pub(crate) const START_OF_STREAM: u8 = 0x0f;

/// Set on `OpenStartElement` when an attribute list follows, and on `Attribute` when another
/// attribute follows.
pub(crate) const HAS_MORE_FLAG: u8 = 0x40;

/// `StartOfStream` is followed by major version, minor version and flags.
pub(crate) const FRAGMENT_HEADER: [u8; 4] = [START_OF_STREAM, 0x01, 0x01, 0x00];

/// Dependency id written for every element; template fragments never use it.
pub(crate) const NO_DEPENDENCY: u16 = 0xffff;

pub(crate) const STRING_VALUE_TYPE: u8 = 0x01;
pub(crate) const NULL_VALUE_TYPE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    EndOfStream,
    OpenStartElement { has_attributes: bool },
    CloseStartElement,
    CloseEmptyElement,
    EndElement,
    Value,
    Attribute { more_attributes_expected: bool },
    Substitution { optional: bool },
    StartOfStream,
}

impl Token {
    pub(crate) fn from_u8(byte: u8) -> Option<Token> {
        match byte {
            END_OF_STREAM => Some(Token::EndOfStream),
            0x01 => Some(Token::OpenStartElement {
                has_attributes: false,
            }),
            0x41 => Some(Token::OpenStartElement {
                has_attributes: true,
            }),
            CLOSE_START_ELEMENT => Some(Token::CloseStartElement),
            CLOSE_EMPTY_ELEMENT => Some(Token::CloseEmptyElement),
            END_ELEMENT => Some(Token::EndElement),
            0x05 | 0x45 => Some(Token::Value),
            0x06 => Some(Token::Attribute {
                more_attributes_expected: false,
            }),
            0x46 => Some(Token::Attribute {
                more_attributes_expected: true,
            }),
            NORMAL_SUBSTITUTION => Some(Token::Substitution { optional: false }),
            OPTIONAL_SUBSTITUTION => Some(Token::Substitution { optional: true }),
            START_OF_STREAM => Some(Token::StartOfStream),
            _ => None,
        }
    }
}
