#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end]).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Encode `s` as UTF-16LE bytes, without a terminator.
pub(crate) fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}
