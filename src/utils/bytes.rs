//! Byte-slice utilities for bounds-oriented parsing.
//!
//! These helpers read little-endian primitives out of `&[u8]` at fixed offsets and return
//! `Option<T>`, so each caller can map a short read to its own error type (the manifest reader
//! turns `None` into `ManifestReadError::Truncated`, the BinXml codec into its own variant).
//!
//! Offsets are `usize` and are interpreted relative to the slice you pass in.

/// Read `N` raw bytes at `offset`.
///
/// Returns `None` if the range is out of bounds.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    let bytes: [u8; N] = buf.get(offset..end)?.try_into().ok()?;
    Some(bytes)
}

pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Read a 4-byte block tag (`CRIM`, `WEVT`, `CHAN`, ...) at `offset`.
pub(crate) fn read_sig(buf: &[u8], offset: usize) -> Option<[u8; 4]> {
    read_array::<4>(buf, offset)
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(read_array::<2>(buf, offset)?))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(read_array::<4>(buf, offset)?))
}

pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(read_array::<8>(buf, offset)?))
}

/// Borrow `len` bytes at `offset`.
pub(crate) fn slice(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    buf.get(offset..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_little_endian_and_bounds_checked() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&buf, 0), Some(0x0201));
        assert_eq!(read_u32_le(&buf, 4), Some(0x0807_0605));
        assert_eq!(read_u64_le(&buf, 0), Some(0x0807_0605_0403_0201));
        assert_eq!(read_u32_le(&buf, 5), None);
        assert_eq!(read_u8(&buf, 8), None);
        assert_eq!(slice(&buf, 6, 2), Some(&buf[6..8]));
        assert_eq!(slice(&buf, usize::MAX, 2), None);
    }
}
