//! Primitive wire encodings.
//!
//! Integers that carry lengths and counters are unsigned LEB128 varints.
//! Strings are a varint byte length followed by UTF-8 bytes. Fixed-width
//! numbers are little-endian.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Upper bound for a single length-prefixed string or byte field.
pub const MAX_STRING_LEN: u64 = 1 << 30;

/// Write an unsigned LEB128 varint.
pub fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned LEB128 varint.
pub fn get_uvarint(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let byte = src.get_u8();
        if shift == 63 && byte > 1 {
            return Err(ProtocolError::VarIntOverflow);
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ProtocolError::VarIntOverflow)
}

/// Write a length-prefixed string.
pub fn put_string(buf: &mut impl BufMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Write length-prefixed raw bytes.
pub fn put_bytes(buf: &mut impl BufMut, value: &[u8]) {
    put_uvarint(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Read length-prefixed raw bytes.
pub fn get_bytes(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let len = get_uvarint(src)?;
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::TooLarge {
            field: "string",
            length: len,
            max: MAX_STRING_LEN,
        });
    }
    let len = len as usize;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Read a length-prefixed UTF-8 string.
pub fn get_string(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let raw = get_bytes(src)?;
    String::from_utf8(raw.to_vec()).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Read a single byte.
pub fn get_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read a little-endian `u32`.
pub fn get_u32_le(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_u32_le())
}

/// Read a little-endian `i32`.
pub fn get_i32_le(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_i32_le())
}

/// Fail with [`ProtocolError::UnexpectedEof`] unless `n` bytes remain.
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn test_uvarint_known_encodings() {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 300);
        assert_eq!(&buf[..], &[0xAC, 0x02]);

        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, 0);
        assert_eq!(&buf[..], &[0x00]);
    }

    #[test]
    fn test_uvarint_truncated() {
        let mut src: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            get_uvarint(&mut src),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_uvarint_overflow() {
        let mut src: &[u8] = &[0xFF; 11];
        assert!(matches!(
            get_uvarint(&mut src),
            Err(ProtocolError::VarIntOverflow)
        ));
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let mut src: &[u8] = &[0x02, 0xC3, 0x28];
        assert!(matches!(
            get_string(&mut src),
            Err(ProtocolError::StringEncoding(_))
        ));
    }

    #[test]
    fn test_string_length_past_end() {
        let mut src: &[u8] = &[0x05, b'a', b'b'];
        assert!(matches!(
            get_string(&mut src),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    proptest! {
        #[test]
        fn uvarint_decodes_what_it_encodes(value in any::<u64>()) {
            let mut buf = BytesMut::new();
            put_uvarint(&mut buf, value);
            let mut src = buf.freeze();
            prop_assert_eq!(get_uvarint(&mut src).unwrap(), value);
            prop_assert!(src.is_empty());
        }
    }
}
