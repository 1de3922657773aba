use super::error::{ManifestReadError, Result};
use super::format::{LIST_HEADER_SIZE, Signature};
use crate::guid::Guid;
use crate::utils::bytes;

/// Read a size-prefixed UTF-16 string. Returns the text and the offset just past the string.
pub(super) fn read_sized_utf16_string(
    buf: &[u8],
    offset: u32,
    what: &'static str,
) -> Result<(String, usize)> {
    let off_usize = u32_to_usize(offset, what, buf.len())?;
    let size = read_u32_named(buf, off_usize, what)?;
    if size < 4 || size % 2 != 0 {
        return Err(ManifestReadError::SizeOutOfBounds { what, offset, size });
    }
    let end = checked_end(buf.len(), offset, size, what)?;
    let text = crate::utils::decode_utf16le_bytes_z(&buf[off_usize + 4..end])
        .map_err(|_| ManifestReadError::InvalidUtf16String { what, offset })?;
    Ok((text, end))
}

fn truncated(buf: &[u8], offset: usize, need: usize, what: &'static str) -> ManifestReadError {
    ManifestReadError::Truncated {
        what,
        offset: usize_to_u32(offset),
        need,
        have: buf.len().saturating_sub(offset),
    }
}

pub(super) fn read_sig_named(buf: &[u8], offset: usize, what: &'static str) -> Result<[u8; 4]> {
    bytes::read_sig(buf, offset).ok_or_else(|| truncated(buf, offset, 4, what))
}

/// Read the tag at `offset` and require it to be `expected`.
pub(super) fn expect_sig(buf: &[u8], offset: usize, expected: [u8; 4], what: &'static str) -> Result<()> {
    let found = read_sig_named(buf, offset, what)?;
    if found != expected {
        return Err(ManifestReadError::InvalidSignature {
            offset: usize_to_u32(offset),
            expected: Signature(expected),
            found: Signature(found),
        });
    }
    Ok(())
}

pub(super) fn read_u8_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u8> {
    bytes::read_u8(buf, offset).ok_or_else(|| truncated(buf, offset, 1, what))
}

pub(super) fn read_u16_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u16> {
    bytes::read_u16_le(buf, offset).ok_or_else(|| truncated(buf, offset, 2, what))
}

pub(super) fn read_u32_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    bytes::read_u32_le(buf, offset).ok_or_else(|| truncated(buf, offset, 4, what))
}

pub(super) fn read_u64_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u64> {
    bytes::read_u64_le(buf, offset).ok_or_else(|| truncated(buf, offset, 8, what))
}

pub(super) fn read_guid_named(buf: &[u8], offset: usize, what: &'static str) -> Result<Guid> {
    let raw = bytes::read_array::<16>(buf, offset).ok_or_else(|| truncated(buf, offset, 16, what))?;
    Ok(Guid::from_bytes(raw))
}

pub(super) fn u32_to_usize(offset: u32, what: &'static str, len: usize) -> Result<usize> {
    let off = usize::try_from(offset).map_err(|_| ManifestReadError::OffsetOutOfBounds {
        what,
        offset,
        len,
    })?;
    if off > len {
        return Err(ManifestReadError::OffsetOutOfBounds { what, offset, len });
    }
    Ok(off)
}

pub(super) fn usize_to_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

pub(super) fn checked_end(len: usize, off: u32, size: u32, what: &'static str) -> Result<usize> {
    let off_usize = u32_to_usize(off, what, len)?;
    let size_usize = usize::try_from(size).map_err(|_| ManifestReadError::SizeOutOfBounds {
        what,
        offset: off,
        size,
    })?;
    let end = off_usize
        .checked_add(size_usize)
        .ok_or(ManifestReadError::SizeOutOfBounds {
            what,
            offset: off,
            size,
        })?;
    if end > len {
        return Err(ManifestReadError::SizeOutOfBounds {
            what,
            offset: off,
            size,
        });
    }
    Ok(end)
}

/// The shared `magic, length, count` prefix of list blocks, bounds-checked.
#[derive(Debug, Clone, Copy)]
pub(super) struct ListHeader {
    pub offset: u32,
    pub size: u32,
    pub count: u32,
    /// First byte after the header.
    pub body: usize,
    /// One past the last byte of the block.
    pub end: usize,
}

impl ListHeader {
    pub(super) fn read(buf: &[u8], offset: u32, sig: [u8; 4], what: &'static str) -> Result<Self> {
        let off = u32_to_usize(offset, what, buf.len())?;
        expect_sig(buf, off, sig, what)?;
        let size = read_u32_named(buf, off + 4, what)?;
        let count = read_u32_named(buf, off + 8, what)?;
        if (size as usize) < LIST_HEADER_SIZE {
            return Err(ManifestReadError::SizeOutOfBounds { what, offset, size });
        }
        let end = checked_end(buf.len(), offset, size, what)?;
        Ok(ListHeader {
            offset,
            size,
            count,
            body: off + LIST_HEADER_SIZE,
            end,
        })
    }

    /// Bounds-check a fixed-size entry array that starts right after the header.
    /// Returns the offset just past the array.
    pub(super) fn entries_end(&self, entry_size: usize, what: &'static str) -> Result<usize> {
        let count = usize::try_from(self.count).map_err(|_| self.bad_count(what))?;
        let bytes = count
            .checked_mul(entry_size)
            .ok_or_else(|| self.bad_count(what))?;
        let entries_end = self.body.checked_add(bytes).ok_or_else(|| self.bad_count(what))?;
        if entries_end > self.end {
            return Err(self.bad_count(what));
        }
        Ok(entries_end)
    }

    pub(super) fn bad_count(&self, what: &'static str) -> ManifestReadError {
        ManifestReadError::CountOutOfBounds {
            what,
            offset: self.offset,
            count: self.count,
        }
    }
}

/// Narrow a `u32` wire field into a smaller integer type.
pub(super) fn narrow<T: TryFrom<u64>>(value: u64, what: &'static str, offset: usize) -> Result<T> {
    T::try_from(value).map_err(|_| ManifestReadError::ValueOutOfRange {
        what,
        offset: usize_to_u32(offset),
        value,
    })
}
