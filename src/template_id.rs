//! Deterministic template identities.
//!
//! A template's GUID is a pure function of its canonical XML text and the ordered list of
//! property type tags. Two schemes exist:
//!
//! - [`TemplateIdScheme::Legacy`]: MD5 over the UTF-16LE XML followed by each tag widened to a
//!   little-endian `u32`. The raw digest is the GUID.
//! - [`TemplateIdScheme::NameBased`]: SHA-256 over a fixed 8-byte marker, the UTF-16LE XML and the
//!   tag bytes. The first 16 digest bytes are stamped with version 5 and the RFC 4122 variant.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::guid::Guid;
use crate::utils::encode_utf16le;

/// Prefix hashed ahead of the XML under [`TemplateIdScheme::NameBased`].
pub const NAME_BASED_MARKER: [u8; 8] = *b"WEVTTMPL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TemplateIdScheme {
    Legacy,
    #[default]
    NameBased,
}

impl TemplateIdScheme {
    pub const ALL: [TemplateIdScheme; 2] = [TemplateIdScheme::NameBased, TemplateIdScheme::Legacy];
}

/// Compute the identity of a template from its canonical XML and ordered type tags.
pub fn template_identity(scheme: TemplateIdScheme, canonical_xml: &str, type_tags: &[u8]) -> Guid {
    match scheme {
        TemplateIdScheme::Legacy => legacy_identity(canonical_xml, type_tags),
        TemplateIdScheme::NameBased => name_based_identity(canonical_xml, type_tags),
    }
}

fn legacy_identity(canonical_xml: &str, type_tags: &[u8]) -> Guid {
    let mut hasher = Md5::new();
    hasher.update(encode_utf16le(canonical_xml));
    for &tag in type_tags {
        hasher.update(u32::from(tag).to_le_bytes());
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Guid::from_bytes(bytes)
}

fn name_based_identity(canonical_xml: &str, type_tags: &[u8]) -> Guid {
    let mut hasher = Sha256::new();
    hasher.update(NAME_BASED_MARKER);
    hasher.update(encode_utf16le(canonical_xml));
    hasher.update(type_tags);

    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    // data3 is stored little-endian, so its high nibble lives in byte 7.
    bytes[7] = (bytes[7] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Guid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<EventData><Data Name="count">%1</Data><Data Name="name">%2</Data></EventData>"#;

    #[test]
    fn test_identity_is_deterministic() {
        for scheme in TemplateIdScheme::ALL {
            let a = template_identity(scheme, XML, &[0x08, 0x01]);
            let b = template_identity(scheme, XML, &[0x08, 0x01]);
            assert_eq!(a, b, "{scheme:?} must be a pure function");
        }
    }

    #[test]
    fn test_identity_is_sensitive_to_tag_order() {
        for scheme in TemplateIdScheme::ALL {
            let a = template_identity(scheme, XML, &[0x08, 0x01]);
            let b = template_identity(scheme, XML, &[0x01, 0x08]);
            assert_ne!(a, b, "{scheme:?} must hash tags in order");
        }
    }

    #[test]
    fn test_schemes_disagree() {
        assert_ne!(
            template_identity(TemplateIdScheme::Legacy, XML, &[0x08]),
            template_identity(TemplateIdScheme::NameBased, XML, &[0x08])
        );
    }

    #[test]
    fn test_name_based_sets_version_and_variant() {
        let guid = template_identity(TemplateIdScheme::NameBased, XML, &[0x08, 0x01]);
        assert_eq!(guid.version(), 5);
        assert_eq!(guid.variant(), 0b10);
    }

    #[test]
    fn test_legacy_matches_plain_md5() {
        let mut input = encode_utf16le("<EventData/>");
        input.extend_from_slice(&0x0000_0001u32.to_le_bytes());
        let digest = Md5::digest(&input);

        let guid = template_identity(TemplateIdScheme::Legacy, "<EventData/>", &[0x01]);
        assert_eq!(&guid.to_bytes()[..], &digest[..]);
    }
}
