//! LEB128 varints and length-prefixed byte strings.
//!
//! Seven payload bits per byte, least significant group first, with the high
//! bit set on every byte except the last. Encoders emit the minimal number of
//! bytes; decoders accept the full 32-bit or 64-bit range and reject
//! encodings that are truncated, too long, or overflow the target width.

use bytes::{Buf, BufMut, Bytes};

/// Maximum bytes needed to encode a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Maximum bytes needed to encode a varint32.
pub const MAX_VARINT32_LEN: usize = 5;

/// Encode a 32-bit unsigned integer as a varint.
///
/// Returns the number of bytes written.
pub fn encode_varint32(buf: &mut impl BufMut, value: u32) -> usize {
    encode_varint64(buf, value as u64)
}

/// Encode a 64-bit unsigned integer as a varint.
///
/// Returns the number of bytes written.
pub fn encode_varint64(buf: &mut impl BufMut, mut value: u64) -> usize {
    let mut count = 1;
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
        count += 1;
    }
    buf.put_u8(value as u8);
    count
}

/// Decode up to `max_len` bytes of varint into a u64 no wider than `bits`.
fn decode_varint(buf: &mut &[u8], max_len: usize, bits: u32) -> Option<u64> {
    let mut result = 0u64;

    for i in 0..max_len {
        if buf.is_empty() {
            return None;
        }

        let byte = buf.get_u8();
        let shift = 7 * i as u32;
        let group = (byte & 0x7F) as u64;

        // The final group may only carry the bits left in the target width.
        if i == max_len - 1 && group >> (bits - shift) != 0 {
            return None;
        }

        result |= group << shift;

        if byte & 0x80 == 0 {
            return Some(result);
        }
    }

    None
}

/// Decode a 32-bit varint from a buffer.
///
/// Returns None if the buffer is too short or the varint is malformed.
pub fn decode_varint32(buf: &mut &[u8]) -> Option<u32> {
    decode_varint(buf, MAX_VARINT32_LEN, 32).map(|v| v as u32)
}

/// Decode a 64-bit varint from a buffer.
///
/// Returns None if the buffer is too short or the varint is malformed.
pub fn decode_varint64(buf: &mut &[u8]) -> Option<u64> {
    decode_varint(buf, MAX_VARINT64_LEN, 64)
}

/// Get the number of bytes needed to encode a varint.
pub fn varint_length(value: u64) -> usize {
    let mut len = 1;
    let mut v = value;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Encode a length-prefixed byte slice.
pub fn encode_length_prefixed(buf: &mut impl BufMut, data: &[u8]) {
    encode_varint32(buf, data.len() as u32);
    buf.put_slice(data);
}

/// Decode a length-prefixed byte slice.
pub fn decode_length_prefixed(buf: &mut &[u8]) -> Option<Bytes> {
    let len = decode_varint32(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Some(data)
}
