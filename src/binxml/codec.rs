use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use super::document::{XmlAttribute, XmlElement, XmlNode};
use super::name::{read_inline_name, write_inline_name};
use super::tokens::*;
use super::BinXmlError;
use crate::utils::bytes;

/// Deepest element nesting accepted in either direction.
pub const MAX_DEPTH: usize = 64;

/// Converts a template payload document to and from BinXml bytes.
pub trait BinXmlCodec {
    /// Encode `document`. Each substitution `i` is tagged with `type_tags[i]`.
    fn encode(&self, document: &XmlElement, type_tags: &[u8]) -> Result<Vec<u8>, BinXmlError>;

    /// Decode a complete fragment. Every byte of `bytes` must be consumed.
    fn decode(&self, bytes: &[u8]) -> Result<XmlElement, BinXmlError>;
}

/// BinXml with inline names, as stored in `TEMP` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineNameCodec;

impl BinXmlCodec for InlineNameCodec {
    fn encode(&self, document: &XmlElement, type_tags: &[u8]) -> Result<Vec<u8>, BinXmlError> {
        let mut encoder = Encoder {
            out: Vec::new(),
            type_tags,
        };
        encoder.out.extend_from_slice(&FRAGMENT_HEADER);
        encoder.element(document, 1)?;
        encoder.out.push(END_OF_STREAM);
        Ok(encoder.out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<XmlElement, BinXmlError> {
        let mut decoder = Decoder { buf: bytes, pos: 0 };

        let header = decoder.take(4, "fragment header")?;
        if header[0] != START_OF_STREAM {
            return Err(BinXmlError::UnexpectedToken {
                token: header[0],
                offset: 0,
                expected: "StartOfStream",
            });
        }

        let offset = decoder.pos;
        let root = match decoder.token()? {
            Token::OpenStartElement { has_attributes } => decoder.element(has_attributes, 1)?,
            _ => return Err(decoder.unexpected(offset, "OpenStartElement")),
        };

        let offset = decoder.pos;
        if decoder.token()? != Token::EndOfStream {
            return Err(decoder.unexpected(offset, "EndOfStream"));
        }
        if decoder.pos != bytes.len() {
            return Err(BinXmlError::TrailingData {
                trailing: bytes.len() - decoder.pos,
            });
        }

        Ok(root)
    }
}

struct Encoder<'t> {
    out: Vec<u8>,
    type_tags: &'t [u8],
}

impl Encoder<'_> {
    /// Reserve a `u32` size field and return its position.
    fn reserve_size(&mut self) -> usize {
        let at = self.out.len();
        self.out.extend_from_slice(&[0; 4]);
        at
    }

    /// Patch the size field at `at` with the number of bytes written since `start`.
    fn patch_size(&mut self, at: usize, start: usize, what: &'static str) -> Result<(), BinXmlError> {
        let size = self.out.len() - start;
        let size = u32::try_from(size).map_err(|_| BinXmlError::TooLong {
            name: what.to_string(),
            len: size,
        })?;
        LittleEndian::write_u32(&mut self.out[at..at + 4], size);
        Ok(())
    }

    fn element(&mut self, element: &XmlElement, depth: usize) -> Result<(), BinXmlError> {
        if depth > MAX_DEPTH {
            return Err(BinXmlError::TooDeep {
                offset: self.out.len(),
            });
        }
        let has_attributes = !element.attributes.is_empty();
        self.out.push(if has_attributes {
            OPEN_START_ELEMENT | HAS_MORE_FLAG
        } else {
            OPEN_START_ELEMENT
        });
        self.out.extend_from_slice(&NO_DEPENDENCY.to_le_bytes());

        let size_at = self.reserve_size();
        let data_start = self.out.len();
        write_inline_name(&mut self.out, &element.name)?;

        if has_attributes {
            let list_at = self.reserve_size();
            let list_start = self.out.len();
            let last = element.attributes.len() - 1;
            for (i, attr) in element.attributes.iter().enumerate() {
                self.out.push(if i < last {
                    ATTRIBUTE | HAS_MORE_FLAG
                } else {
                    ATTRIBUTE
                });
                self.attribute(attr)?;
            }
            self.patch_size(list_at, list_start, "attribute list")?;
        }

        if element.children.is_empty() {
            self.out.push(CLOSE_EMPTY_ELEMENT);
        } else {
            self.out.push(CLOSE_START_ELEMENT);
            for child in &element.children {
                match child {
                    XmlNode::Element(e) => self.element(e, depth + 1)?,
                    other => self.value(other)?,
                }
            }
            self.out.push(END_ELEMENT);
        }

        self.patch_size(size_at, data_start, "element")
    }

    fn attribute(&mut self, attr: &XmlAttribute) -> Result<(), BinXmlError> {
        write_inline_name(&mut self.out, &attr.name)?;
        for node in &attr.value {
            if let XmlNode::Element(_) = node {
                return Err(BinXmlError::ElementInAttribute {
                    name: attr.name.clone(),
                });
            }
            self.value(node)?;
        }
        Ok(())
    }

    fn value(&mut self, node: &XmlNode) -> Result<(), BinXmlError> {
        match node {
            XmlNode::Text(text) => {
                let units: Vec<u16> = text.encode_utf16().collect();
                let count = u16::try_from(units.len()).map_err(|_| BinXmlError::TooLong {
                    name: "text value".to_string(),
                    len: units.len(),
                })?;
                self.out.push(VALUE);
                self.out.push(STRING_VALUE_TYPE);
                self.out.extend_from_slice(&count.to_le_bytes());
                for unit in units {
                    self.out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            XmlNode::Substitution { index, optional } => {
                let value_type = self
                    .type_tags
                    .get(usize::from(*index))
                    .copied()
                    .unwrap_or(NULL_VALUE_TYPE);
                self.out.push(if *optional {
                    OPTIONAL_SUBSTITUTION
                } else {
                    NORMAL_SUBSTITUTION
                });
                self.out.extend_from_slice(&index.to_le_bytes());
                self.out.push(value_type);
            }
            XmlNode::Element(_) => {
                return Err(BinXmlError::UnexpectedToken {
                    token: OPEN_START_ELEMENT,
                    offset: self.out.len(),
                    expected: "Value or Substitution",
                });
            }
        }
        Ok(())
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], BinXmlError> {
        let slice = bytes::slice(self.buf, self.pos, len).ok_or(BinXmlError::Truncated {
            what,
            offset: self.pos,
        })?;
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, BinXmlError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, BinXmlError> {
        Ok(LittleEndian::read_u16(self.take(2, what)?))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, BinXmlError> {
        Ok(LittleEndian::read_u32(self.take(4, what)?))
    }

    fn peek_token(&self) -> Result<Token, BinXmlError> {
        let byte = bytes::read_u8(self.buf, self.pos).ok_or(BinXmlError::Truncated {
            what: "token",
            offset: self.pos,
        })?;
        Token::from_u8(byte).ok_or(BinXmlError::UnexpectedToken {
            token: byte,
            offset: self.pos,
            expected: "a template BinXml token",
        })
    }

    fn token(&mut self) -> Result<Token, BinXmlError> {
        let token = self.peek_token()?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(&self, offset: usize, expected: &'static str) -> BinXmlError {
        BinXmlError::UnexpectedToken {
            token: self.buf.get(offset).copied().unwrap_or(END_OF_STREAM),
            offset,
            expected,
        }
    }

    fn name(&mut self) -> Result<String, BinXmlError> {
        let (name, end) = read_inline_name(self.buf, self.pos)?;
        self.pos = end;
        Ok(name)
    }

    /// Parse an element whose `OpenStartElement` token was already consumed.
    fn element(&mut self, has_attributes: bool, depth: usize) -> Result<XmlElement, BinXmlError> {
        if depth > MAX_DEPTH {
            return Err(BinXmlError::TooDeep {
                offset: self.pos - 1,
            });
        }
        let _dependency_id = self.u16("dependency id")?;
        let size_offset = self.pos;
        let data_size = self.u32("element data size")?;
        let data_start = self.pos;

        let mut element = XmlElement::new(self.name()?);
        trace!("BinXml element `{}` at offset {}", element.name, size_offset);

        if has_attributes {
            let _list_size = self.u32("attribute list size")?;
            loop {
                let offset = self.pos;
                let more = match self.token()? {
                    Token::Attribute {
                        more_attributes_expected,
                    } => more_attributes_expected,
                    _ => return Err(self.unexpected(offset, "Attribute")),
                };
                let name = self.name()?;
                let mut value = Vec::new();
                while let Token::Value | Token::Substitution { .. } = self.peek_token()? {
                    value.push(self.value()?);
                }
                element.attributes.push(XmlAttribute { name, value });
                if !more {
                    break;
                }
            }
        }

        let offset = self.pos;
        match self.token()? {
            Token::CloseEmptyElement => {}
            Token::CloseStartElement => loop {
                let offset = self.pos;
                match self.peek_token()? {
                    Token::EndElement => {
                        self.pos += 1;
                        break;
                    }
                    Token::OpenStartElement { has_attributes } => {
                        self.pos += 1;
                        let child = self.element(has_attributes, depth + 1)?;
                        element.children.push(XmlNode::Element(child));
                    }
                    Token::Value | Token::Substitution { .. } => {
                        element.children.push(self.value()?);
                    }
                    _ => return Err(self.unexpected(offset, "element content")),
                }
            },
            _ => return Err(self.unexpected(offset, "CloseStartElement or CloseEmptyElement")),
        }

        let actual = self.pos - data_start;
        if usize::try_from(data_size).ok() != Some(actual) {
            return Err(BinXmlError::SizeMismatch {
                what: "element data",
                offset: size_offset,
                recorded: data_size,
                actual,
            });
        }

        Ok(element)
    }

    fn value(&mut self) -> Result<XmlNode, BinXmlError> {
        let offset = self.pos;
        match self.token()? {
            Token::Value => {
                let type_offset = self.pos;
                let value_type = self.u8("value type")?;
                if value_type != STRING_VALUE_TYPE {
                    return Err(BinXmlError::UnsupportedValueType {
                        value_type,
                        offset: type_offset,
                    });
                }
                let count = usize::from(self.u16("string length")?);
                let text_offset = self.pos;
                let raw = self.take(count * 2, "string value")?;
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let text = String::from_utf16(&units)
                    .map_err(|_| BinXmlError::InvalidUtf16 {
                        offset: text_offset,
                    })?;
                Ok(XmlNode::Text(text))
            }
            Token::Substitution { optional } => {
                let index = self.u16("substitution index")?;
                let _value_type = self.u8("substitution value type")?;
                Ok(XmlNode::Substitution { index, optional })
            }
            _ => Err(self.unexpected(offset, "Value or Substitution")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::name_hash;
    use pretty_assertions::assert_eq;

    fn event_data() -> XmlElement {
        XmlElement::new("EventData").with_child(XmlNode::Element(
            XmlElement::new("Data")
                .with_attribute("Name", "Foo")
                .with_child(XmlNode::Substitution {
                    index: 0,
                    optional: false,
                }),
        ))
    }

    #[test]
    fn test_encode_emits_inline_name_tokens() {
        let bytes = InlineNameCodec.encode(&event_data(), &[0x08]).unwrap();

        assert_eq!(&bytes[..4], &[0x0f, 0x01, 0x01, 0x00]);
        // <EventData> has no attributes.
        assert_eq!(bytes[4], 0x01);
        assert_eq!(&bytes[5..7], &0xFFFFu16.to_le_bytes());
        assert_eq!(&bytes[11..13], &name_hash("EventData").to_le_bytes());
        assert_eq!(*bytes.last().unwrap(), 0x00);

        // The substitution carries the property's type tag.
        let sub = bytes
            .windows(4)
            .position(|w| w == [0x0d, 0x00, 0x00, 0x08])
            .expect("substitution token");
        assert!(sub > 4);
    }

    #[test]
    fn test_decode_restores_encoded_document() {
        let doc = event_data().with_child(XmlNode::Text("tail".to_string()));
        let bytes = InlineNameCodec.encode(&doc, &[0x01]).unwrap();
        assert_eq!(InlineNameCodec.decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = InlineNameCodec.encode(&event_data(), &[]).unwrap();
        bytes.push(0);
        assert_eq!(
            InlineNameCodec.decode(&bytes),
            Err(BinXmlError::TrailingData { trailing: 1 })
        );
    }

    #[test]
    fn test_decode_checks_element_data_size() {
        let mut bytes = InlineNameCodec.encode(&event_data(), &[]).unwrap();
        // Root element data size lives right after token + dependency id.
        bytes[7] = bytes[7].wrapping_add(1);
        assert!(matches!(
            InlineNameCodec.decode(&bytes),
            Err(BinXmlError::SizeMismatch { offset: 7, .. })
        ));
    }

    fn nested(depth: usize) -> XmlElement {
        let mut element = XmlElement::new("a");
        for _ in 1..depth {
            element = XmlElement::new("a").with_child(XmlNode::Element(element));
        }
        element
    }

    #[test]
    fn test_decode_rejects_runaway_nesting() {
        let mut bytes = FRAGMENT_HEADER.to_vec();
        for _ in 0..100_000 {
            bytes.push(OPEN_START_ELEMENT);
            bytes.extend_from_slice(&NO_DEPENDENCY.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            write_inline_name(&mut bytes, "a").unwrap();
        }

        let element_len = (bytes.len() - FRAGMENT_HEADER.len()) / 100_000;
        assert_eq!(
            InlineNameCodec.decode(&bytes),
            Err(BinXmlError::TooDeep {
                offset: FRAGMENT_HEADER.len() + MAX_DEPTH * element_len
            })
        );
    }

    #[test]
    fn test_nesting_limit_is_shared_by_both_directions() {
        let deepest = nested(MAX_DEPTH);
        let bytes = InlineNameCodec.encode(&deepest, &[]).unwrap();
        assert_eq!(InlineNameCodec.decode(&bytes).unwrap(), deepest);

        assert!(matches!(
            InlineNameCodec.encode(&nested(MAX_DEPTH + 1), &[]),
            Err(BinXmlError::TooDeep { .. })
        ));
    }
}
