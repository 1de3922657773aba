use std::fmt::{self, Debug, Display, Write};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// A Windows GUID in its mixed-endian on-disk layout (`data1..data3` little-endian, `data4` raw).
#[derive(PartialOrd, Ord, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid GUID string `{0}`")]
pub struct GuidParseError(pub String);

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Guid {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Decode the 16-byte little-endian layout used inside CRIM blobs.
    pub fn from_bytes(bytes: [u8; 16]) -> Guid {
        let mut data4 = [0; 8];
        data4.copy_from_slice(&bytes[8..16]);
        Guid {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4,
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0; 16];
        out[0..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..16].copy_from_slice(&self.data4);
        out
    }

    pub fn is_nil(&self) -> bool {
        *self == Guid::default()
    }

    /// The version nibble (the high four bits of `data3`).
    pub fn version(&self) -> u8 {
        (self.data3 >> 12) as u8
    }

    /// The two RFC 4122 variant bits, `0b10` for name-based GUIDs.
    pub fn variant(&self) -> u8 {
        self.data4[0] >> 6
    }

    fn render(&self) -> String {
        // Always 36 characters.
        let mut s = String::with_capacity(36);

        let _ = write!(
            &mut s,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        );

        s
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    /// Accepts `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, optionally wrapped in braces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || GuidParseError(s.to_string());
        let trimmed = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);

        let groups: Vec<&str> = trimmed.split('-').collect();
        if groups.len() != 5
            || groups
                .iter()
                .zip([8, 4, 4, 4, 12])
                .any(|(g, len)| g.len() != len || !g.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(err());
        }

        let data1 = u32::from_str_radix(groups[0], 16).map_err(|_| err())?;
        let data2 = u16::from_str_radix(groups[1], 16).map_err(|_| err())?;
        let data3 = u16::from_str_radix(groups[2], 16).map_err(|_| err())?;

        let tail: String = [groups[3], groups[4]].concat();
        let mut data4 = [0u8; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }

        Ok(Guid::new(data1, data2, data3, data4))
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_guid_bytes_use_mixed_endian_layout() {
        let guid: Guid = "{01020304-0506-0708-090A-0B0C0D0E0F10}".parse().unwrap();
        assert_eq!(
            guid.to_bytes(),
            [
                0x04, 0x03, 0x02, 0x01, 0x06, 0x05, 0x08, 0x07, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
                0x0E, 0x0F, 0x10
            ]
        );
        assert_eq!(Guid::from_bytes(guid.to_bytes()), guid);
        assert_eq!(guid.to_string(), "01020304-0506-0708-090A-0B0C0D0E0F10");
    }

    #[test]
    fn test_guid_rejects_malformed_strings() {
        assert!("not-a-guid".parse::<Guid>().is_err());
        assert!("01020304-0506-0708-090A-0B0C0D0E0F1".parse::<Guid>().is_err());
        assert!("0102030G-0506-0708-090A-0B0C0D0E0F10".parse::<Guid>().is_err());
    }
}
