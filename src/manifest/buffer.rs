//! The writer's output buffer.
//!
//! Headers, offset tables and entry arrays are sized before their contents are known: the writer
//! [`reserve`](BlobBuffer::reserve)s zeroed space, keeps writing forward, and later fills the
//! reservation in place through [`patch`](BlobBuffer::patch).

use byteorder::{ByteOrder, LittleEndian};

use super::error::ManifestWriteError;
use crate::guid::Guid;
use crate::utils::encode_utf16le;

type Result<T> = std::result::Result<T, ManifestWriteError>;

/// A span of zeroed bytes waiting to be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) struct Reservation {
    start: usize,
    len: usize,
}

impl Reservation {
    pub(crate) fn start(&self) -> usize {
        self.start
    }
}

#[derive(Debug, Default)]
pub(crate) struct BlobBuffer {
    buf: Vec<u8>,
}

impl BlobBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// The current write position as a blob offset.
    pub(crate) fn position(&self) -> Result<u32> {
        to_offset(self.buf.len())
    }

    pub(crate) fn reserve(&mut self, len: usize) -> Reservation {
        let start = self.buf.len();
        self.buf.resize(start + len, 0);
        Reservation { start, len }
    }

    /// The reserved bytes, for in-place patching.
    pub(crate) fn patch(&mut self, reservation: Reservation) -> &mut [u8] {
        &mut self.buf[reservation.start..reservation.start + reservation.len]
    }

    /// Zero-pad up to the next multiple of `alignment`.
    pub(crate) fn align(&mut self, alignment: usize) {
        let rem = self.buf.len() % alignment;
        if rem != 0 {
            self.buf.resize(self.buf.len() + alignment - rem, 0);
        }
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a size-prefixed, NUL-terminated UTF-16 string and return its offset.
    pub(crate) fn put_sized_utf16(&mut self, s: &str) -> Result<u32> {
        let offset = self.position()?;
        let text = encode_utf16le(s);
        let size = 4 + text.len() + 2;
        self.put_u32(to_offset(size)?);
        self.put_bytes(&text);
        self.put_bytes(&[0, 0]);
        Ok(offset)
    }
}

pub(crate) fn to_offset(size: usize) -> Result<u32> {
    u32::try_from(size).map_err(|_| ManifestWriteError::BlobTooLarge { size })
}

/// Little-endian field writer over a reserved slot.
pub(crate) struct SlotWriter<'a> {
    slot: &'a mut [u8],
    pos: usize,
}

impl<'a> SlotWriter<'a> {
    pub(crate) fn new(slot: &'a mut [u8]) -> Self {
        SlotWriter { slot, pos: 0 }
    }

    /// Continue writing at `pos` bytes into the slot.
    pub(crate) fn at(slot: &'a mut [u8], pos: usize) -> Self {
        SlotWriter { slot, pos }
    }

    pub(crate) fn sig(&mut self, sig: [u8; 4]) -> &mut Self {
        self.bytes(&sig)
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.slot[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        self
    }

    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        self.slot[self.pos] = value;
        self.pos += 1;
        self
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        LittleEndian::write_u16(&mut self.slot[self.pos..self.pos + 2], value);
        self.pos += 2;
        self
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        LittleEndian::write_u32(&mut self.slot[self.pos..self.pos + 4], value);
        self.pos += 4;
        self
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        LittleEndian::write_u64(&mut self.slot[self.pos..self.pos + 8], value);
        self.pos += 8;
        self
    }

    pub(crate) fn guid(&mut self, guid: &Guid) -> &mut Self {
        self.bytes(&guid.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_then_patch() {
        let mut out = BlobBuffer::new();
        let header = out.reserve(8);
        out.put_u32(0xdead_beef);
        let total = out.position().unwrap();
        SlotWriter::new(out.patch(header)).sig(*b"CRIM").u32(total);

        assert_eq!(
            out.into_inner(),
            vec![b'C', b'R', b'I', b'M', 12, 0, 0, 0, 0xef, 0xbe, 0xad, 0xde]
        );
    }

    #[test]
    fn test_sized_string_counts_prefix_and_terminator() {
        let mut out = BlobBuffer::new();
        out.put_bytes(&[1, 2]);
        let offset = out.put_sized_utf16("ab").unwrap();
        assert_eq!(offset, 2);
        assert_eq!(&out.into_inner()[2..], &[10, 0, 0, 0, b'a', 0, b'b', 0, 0, 0]);
    }

    #[test]
    fn test_align_pads_with_zeroes() {
        let mut out = BlobBuffer::new();
        out.put_bytes(&[1, 2, 3]);
        out.align(8);
        assert_eq!(out.position().unwrap(), 8);
        out.align(8);
        assert_eq!(out.into_inner(), vec![1, 2, 3, 0, 0, 0, 0, 0]);
    }
}
