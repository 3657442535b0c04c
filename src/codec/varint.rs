// src/codec/varint.rs
//! Variable-length integer encoding
//!
//! Every integer on the wire, except single bytes, is written 7 bits at a
//! time, least significant group first, with the high bit of each byte set
//! when more bytes follow. The encoding is capped at nine bytes: the ninth
//! byte carries a full eight bits, so any `u64` fits.
//!
//! Signed values are written as their two's complement bit pattern, so a
//! negative `i64` always takes nine bytes. Narrower signed integers are
//! sign-extended to 64 bits first.
//!
//! Floats and doubles are fixed-width big-endian, booleans one byte, and
//! text is a varint byte length followed by UTF-8.

use crate::utils::errors::{RecordingError, Result};
use bytes::BufMut;

/// Longest possible encoding of one integer
pub const MAX_VARINT_LEN: usize = 9;

/// Encode an unsigned integer
pub fn encode_u64(buf: &mut impl BufMut, value: u64) {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let len = encode_into(value, &mut scratch);
    buf.put_slice(&scratch[..len]);
}

/// Encode a signed integer as its two's complement bit pattern
pub fn encode_i64(buf: &mut impl BufMut, value: i64) {
    encode_u64(buf, value as u64);
}

/// Encode into a stack buffer, returning the number of bytes used
pub fn encode_into(mut value: u64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    for (i, slot) in out.iter_mut().take(MAX_VARINT_LEN - 1).enumerate() {
        if value < 0x80 {
            *slot = value as u8;
            return i + 1;
        }
        *slot = (value as u8 & 0x7F) | 0x80;
        value >>= 7;
    }
    out[MAX_VARINT_LEN - 1] = value as u8;
    MAX_VARINT_LEN
}

/// Number of bytes `encode_u64` would produce
pub fn encoded_len(value: u64) -> usize {
    let mut remaining = value;
    for len in 1..MAX_VARINT_LEN {
        if remaining < 0x80 {
            return len;
        }
        remaining >>= 7;
    }
    MAX_VARINT_LEN
}

/// Decode an unsigned integer starting at `position`, never reading at or past `limit`.
///
/// Returns the value and the position just after it.
pub fn decode_u64(data: &[u8], position: usize, limit: usize) -> Result<(u64, usize)> {
    let limit = limit.min(data.len());
    let mut value = 0u64;
    let mut pos = position;

    for i in 0..MAX_VARINT_LEN {
        if pos >= limit {
            return Err(RecordingError::format(format!(
                "varint at offset {} runs past record limit {}",
                position, limit
            )));
        }
        let byte = data[pos];
        pos += 1;

        if i == MAX_VARINT_LEN - 1 {
            value |= (byte as u64) << 56;
            return Ok((value, pos));
        }

        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, pos));
        }
    }

    unreachable!("the ninth byte always terminates the loop")
}

/// Encode a boolean as one byte
pub fn encode_bool(buf: &mut impl BufMut, value: bool) {
    buf.put_u8(value as u8);
}

/// Encode length-prefixed UTF-8 text
pub fn encode_text(buf: &mut impl BufMut, value: &str) {
    encode_u64(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

/// Encode a 32-bit float, big-endian
pub fn encode_f32(buf: &mut impl BufMut, value: f32) {
    buf.put_f32(value);
}

/// Encode a 64-bit float, big-endian
pub fn encode_f64(buf: &mut impl BufMut, value: f64) {
    buf.put_f64(value);
}
