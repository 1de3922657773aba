use super::BinXmlError;
use crate::utils::bytes;

/// The inline-name hash: `hash = hash * 65599 + unit` over UTF-16 code units, low 16 bits kept.
pub fn name_hash(name: &str) -> u16 {
    let mut hash: u32 = 0;
    for unit in name.encode_utf16() {
        hash = hash.wrapping_mul(65599).wrapping_add(u32::from(unit));
    }
    (hash & 0xffff) as u16
}

/// Append `hash u16, char count u16, UTF-16 text, NUL u16`.
pub(crate) fn write_inline_name(out: &mut Vec<u8>, name: &str) -> Result<(), BinXmlError> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let count = u16::try_from(units.len()).map_err(|_| BinXmlError::TooLong {
        name: name.to_string(),
        len: units.len(),
    })?;

    out.extend_from_slice(&name_hash(name).to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    Ok(())
}

/// Read an inline name at `offset`, returning the name and the offset just past it.
pub(crate) fn read_inline_name(buf: &[u8], offset: usize) -> Result<(String, usize), BinXmlError> {
    let truncated = BinXmlError::Truncated {
        what: "inline name",
        offset,
    };
    let stored = bytes::read_u16_le(buf, offset).ok_or(truncated.clone())?;
    let count = usize::from(bytes::read_u16_le(buf, offset + 2).ok_or(truncated.clone())?);

    let text_off = offset + 4;
    // Characters plus the NUL terminator.
    let raw = bytes::slice(buf, text_off, (count + 1) * 2).ok_or(truncated)?;
    let units: Vec<u16> = raw[..count * 2]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name =
        String::from_utf16(&units).map_err(|_| BinXmlError::InvalidUtf16 { offset: text_off })?;

    let computed = name_hash(&name);
    if computed != stored {
        return Err(BinXmlError::NameHashMismatch {
            name,
            offset,
            stored,
            computed,
        });
    }

    Ok((name, text_off + (count + 1) * 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_name_layout() {
        let mut out = Vec::new();
        write_inline_name(&mut out, "Data").unwrap();

        assert_eq!(&out[0..2], &name_hash("Data").to_le_bytes());
        assert_eq!(&out[2..4], &4u16.to_le_bytes());
        assert_eq!(out.len(), 4 + 4 * 2 + 2);
        assert_eq!(read_inline_name(&out, 0).unwrap(), ("Data".to_string(), out.len()));
    }

    #[test]
    fn test_hash_mismatch_is_reported() {
        let mut out = Vec::new();
        write_inline_name(&mut out, "Data").unwrap();
        out[0] ^= 0xff;
        assert!(matches!(
            read_inline_name(&out, 0),
            Err(BinXmlError::NameHashMismatch { .. })
        ));
    }
}
