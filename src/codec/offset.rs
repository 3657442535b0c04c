// src/codec/offset.rs
//! Bounded cursor over one length-prefixed record
//!
//! Every record starts with a 4-byte big-endian length. An `Offset` reads
//! that prefix and refuses any read that would cross `start + 4 + length`,
//! so a structural decoding bug surfaces as `InvalidFormat` instead of
//! bleeding into the next record.

use crate::codec::varint;
use crate::utils::errors::{RecordingError, Result};

/// Size of the record length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Read a big-endian `u32` at an absolute position
pub fn read_u32_at(data: &[u8], position: usize) -> Result<u32> {
    let bytes = slice_at(data, position, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a big-endian `u64` at an absolute position
pub fn read_u64_at(data: &[u8], position: usize) -> Result<u64> {
    let bytes = slice_at(data, position, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

fn slice_at(data: &[u8], position: usize, len: usize) -> Result<&[u8]> {
    position
        .checked_add(len)
        .and_then(|end| data.get(position..end))
        .ok_or_else(|| {
            RecordingError::format(format!(
                "read of {} bytes at offset {} exceeds buffer of {} bytes",
                len,
                position,
                data.len()
            ))
        })
}

/// Cursor with an enforced upper bound
#[derive(Debug, Clone)]
pub struct Offset<'a> {
    data: &'a [u8],
    start: usize,
    position: usize,
    limit: usize,
}

impl<'a> Offset<'a> {
    /// Open the record whose length prefix sits at `start`
    pub fn new(data: &'a [u8], start: usize) -> Result<Self> {
        let length = read_u32_at(data, start)? as usize;
        let limit = start + LENGTH_PREFIX + length;
        if limit > data.len() {
            return Err(RecordingError::format(format!(
                "record at offset {} declares {} bytes but only {} remain",
                start,
                length,
                data.len() - start - LENGTH_PREFIX
            )));
        }

        Ok(Self {
            data,
            start,
            position: start + LENGTH_PREFIX,
            limit,
        })
    }

    /// Advance by `n` bytes, returning the position before the move
    pub fn increase(&mut self, n: i64) -> Result<usize> {
        if n < 0 {
            return Err(RecordingError::format(format!(
                "negative advance of {} at offset {}",
                n, self.position
            )));
        }
        let n = n as u64;
        if n > (self.limit - self.position) as u64 {
            return Err(RecordingError::format(format!(
                "advance of {} at offset {} crosses record limit {}",
                n, self.position, self.limit
            )));
        }

        let before = self.position;
        self.position += n as usize;
        Ok(before)
    }

    /// Offset of the length prefix
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// First byte past this record
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Move the cursor to the end of the record
    pub fn skip_to_end(&mut self) {
        self.position = self.limit;
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let at = self.increase(n as i64)?;
        Ok(&self.data[at..at + n])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let at = self.increase(1)?;
        Ok(self.data[at])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RecordingError::format(format!(
                "invalid boolean byte {:#04x} at offset {}",
                other,
                self.position - 1
            ))),
        }
    }

    /// Read a varint as unsigned
    pub fn read_u64(&mut self) -> Result<u64> {
        let (value, end) = varint::decode_u64(self.data, self.position, self.limit)?;
        self.position = end;
        Ok(value)
    }

    /// Read a varint as a two's complement signed value
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a varint that is used as a count or length of in-record data
    pub fn read_len(&mut self) -> Result<usize> {
        let value = self.read_u64()?;
        if value > self.remaining() as u64 {
            return Err(RecordingError::format(format!(
                "length {} at offset {} exceeds remaining {} bytes",
                value,
                self.position,
                self.remaining()
            )));
        }
        Ok(value as usize)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.read_bytes(4)?;
        Ok(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(raw))
    }

    /// Read length-prefixed UTF-8 text
    pub fn read_text(&mut self) -> Result<&'a str> {
        let len = self.read_len()?;
        let at = self.position;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|e| {
            RecordingError::format(format!("invalid UTF-8 text at offset {}: {}", at, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use proptest::prelude::*;

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        buf.to_vec()
    }

    #[test]
    fn test_limit_from_length_prefix() {
        let data = record(&[1, 2, 3]);
        let offset = Offset::new(&data, 0).unwrap();
        assert_eq!(offset.position(), 4);
        assert_eq!(offset.limit(), 7);
        assert_eq!(offset.remaining(), 3);
    }

    #[test]
    fn test_declared_length_past_buffer() {
        let mut data = record(&[1, 2, 3]);
        data.truncate(5);
        assert!(Offset::new(&data, 0).unwrap_err().is_format_error());
        assert!(Offset::new(&[0, 0], 0).is_err());
    }

    #[test]
    fn test_negative_increase_fails() {
        let data = record(&[0; 8]);
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(offset.increase(-1).is_err());
        assert_eq!(offset.position(), 4);
    }

    #[test]
    fn test_increase_to_exact_limit() {
        let data = record(&[0; 8]);
        let mut offset = Offset::new(&data, 0).unwrap();
        assert_eq!(offset.increase(8).unwrap(), 4);
        assert_eq!(offset.remaining(), 0);
        assert!(offset.increase(1).is_err());
        assert!(offset.increase(0).is_ok());
    }

    #[test]
    fn test_reads_stay_inside_record() {
        // Two records back to back; reading the first must not spill into the second
        let mut data = record(&[0x80]);
        data.extend(record(&[0x01]));
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(offset.read_u64().is_err());

        let mut second = Offset::new(&data, 5).unwrap();
        assert_eq!(second.read_u64().unwrap(), 1);
    }

    #[test]
    fn test_read_text_and_scalars() {
        let mut payload = BytesMut::new();
        crate::codec::varint::encode_text(&mut payload, "flight");
        payload.put_f32(0.5);
        payload.put_f64(1.25);
        payload.put_u8(1);
        let data = record(&payload);

        let mut offset = Offset::new(&data, 0).unwrap();
        assert_eq!(offset.read_text().unwrap(), "flight");
        assert_eq!(offset.read_f32().unwrap(), 0.5);
        assert_eq!(offset.read_f64().unwrap(), 1.25);
        assert!(offset.read_bool().unwrap());
        assert_eq!(offset.remaining(), 0);
    }

    #[test]
    fn test_unreasonable_text_length() {
        let mut payload = BytesMut::new();
        crate::codec::varint::encode_u64(&mut payload, 1_000_000);
        payload.put_slice(b"abc");
        let data = record(&payload);
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(offset.read_text().unwrap_err().is_format_error());
    }

    #[test]
    fn test_invalid_boolean() {
        let data = record(&[7]);
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(offset.read_bool().is_err());
    }

    #[test]
    fn test_absolute_reads() {
        let data = [0u8, 0, 0, 0, 0, 0, 1, 2, 0xff];
        assert_eq!(read_u64_at(&data, 0).unwrap(), 0x0102);
        assert_eq!(read_u32_at(&data, 4).unwrap(), 0x0102);
        assert!(read_u64_at(&data, 2).is_err());
        assert!(read_u32_at(&data, usize::MAX).is_err());
    }

    proptest! {
        #[test]
        fn prop_increase_bounded(len in 0usize..64, skip in 0usize..64, n in -64i64..128) {
            let data = record(&vec![0u8; len]);
            let mut offset = Offset::new(&data, 0).unwrap();
            let skip = skip.min(len);
            offset.increase(skip as i64).unwrap();

            let position = offset.position();
            let result = offset.increase(n);
            if n < 0 || position as i64 + n > offset.limit() as i64 {
                prop_assert!(result.is_err());
                prop_assert_eq!(offset.position(), position);
            } else {
                prop_assert_eq!(result.unwrap(), position);
                prop_assert_eq!(offset.position(), position + n as usize);
            }
        }
    }
}
