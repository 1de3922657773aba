pub(crate) mod bytes;
mod utf16;

pub(crate) use self::utf16::{decode_utf16le_bytes_z, encode_utf16le};
