// src/recording/mmap_writer.rs
//! Fixed-capacity memory-mapped buffer
//!
//! The physical medium for one in-progress chunk segment. Capacity is set at
//! construction and never changes; a write that does not fit fails with
//! `BufferOverflow` and the caller is expected to rotate instead.

use crate::codec::varint::{self, MAX_VARINT_LEN};
use crate::utils::errors::{RecordingError, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Memory-mapped chunk segment writer
pub struct MappedChunkWriter {
    path: PathBuf,
    // Keeps the mapping's backing file open
    _file: File,
    mmap: MmapMut,
    position: usize,
    capacity: usize,
}

impl MappedChunkWriter {
    /// Map `capacity` bytes of the file at `path`, creating it if needed
    pub fn new<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RecordingError::argument("mapped buffer capacity must be positive"));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| RecordingError::StorageFailed(format!("Failed to open file: {}", e)))?;

        file.set_len(capacity as u64).map_err(|e| {
            RecordingError::StorageFailed(format!("Failed to set file size: {}", e))
        })?;

        // SAFETY: the file was just created and sized by us and is only
        // mutated through this mapping for the writer's lifetime.
        let mmap = unsafe {
            MmapOptions::new().len(capacity).map_mut(&file).map_err(|e| {
                RecordingError::StorageFailed(format!("Failed to create memory map: {}", e))
            })?
        };

        debug!("Mapped {} bytes at {}", capacity, path.display());

        Ok(Self {
            path,
            _file: file,
            mmap,
            position: 0,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Whether `n` more bytes fit at the cursor
    pub fn can_fit(&self, n: usize) -> bool {
        n <= self.available()
    }

    /// Rewind the cursor; the mapping is kept
    pub fn reset(&mut self) {
        self.position = 0;
    }

    fn reserve(&mut self, n: usize) -> Result<usize> {
        if !self.can_fit(n) {
            return Err(RecordingError::BufferOverflow {
                requested: n,
                available: self.available(),
            });
        }
        let at = self.position;
        self.position += n;
        Ok(at)
    }

    /// Append raw bytes, returning the offset they were written at
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        let at = self.reserve(data.len())?;
        self.mmap[at..at + data.len()].copy_from_slice(data);
        Ok(at)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<usize> {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<usize> {
        self.write_bytes(&[value as u8])
    }

    pub fn write_bool(&mut self, value: bool) -> Result<usize> {
        self.write_bytes(&[value as u8])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<usize> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<usize> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<usize> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<usize> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<usize> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Append a varint
    pub fn write_varint(&mut self, value: u64) -> Result<usize> {
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let len = varint::encode_into(value, &mut scratch);
        self.write_bytes(&scratch[..len])
    }

    pub fn write_varint_i64(&mut self, value: i64) -> Result<usize> {
        self.write_varint(value as u64)
    }

    /// Append length-prefixed UTF-8 text. Nothing is written if it does not fit.
    pub fn write_text(&mut self, value: &str) -> Result<usize> {
        let needed = varint::encoded_len(value.len() as u64) + value.len();
        if !self.can_fit(needed) {
            return Err(RecordingError::BufferOverflow {
                requested: needed,
                available: self.available(),
            });
        }
        let at = self.write_varint(value.len() as u64)?;
        self.write_bytes(value.as_bytes())?;
        Ok(at)
    }

    /// Overwrite already written bytes at `offset` without moving the cursor
    pub fn write_bytes_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len()).filter(|&end| end <= self.position);
        let Some(end) = end else {
            return Err(RecordingError::argument(format!(
                "write of {} bytes at {} is outside the written region of {} bytes",
                data.len(),
                offset,
                self.position
            )));
        };
        self.mmap[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn write_u32_at(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_bytes_at(offset, &value.to_be_bytes())
    }

    pub fn write_u64_at(&mut self, offset: usize, value: u64) -> Result<()> {
        self.write_bytes_at(offset, &value.to_be_bytes())
    }

    /// Flush written pages to stable storage
    pub fn force(&self) -> Result<()> {
        if self.position == 0 {
            return Ok(());
        }
        self.mmap.flush_range(0, self.position).map_err(|e| {
            RecordingError::StorageFailed(format!("Failed to flush memory map: {}", e))
        })
    }

    /// The written bytes, exactly `position` of them
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..self.position]
    }

    /// Copy the written bytes to `sink`; repeatable
    pub fn copy_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<usize> {
        sink.write_all(self.as_bytes())?;
        Ok(self.position)
    }

    /// Owned copy of the written bytes; repeatable
    pub fn export_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Drop for MappedChunkWriter {
    fn drop(&mut self) {
        if let Err(e) = self.force() {
            warn!("Failed to flush {} on drop: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_creation() {
        let dir = tempdir().unwrap();
        let writer = MappedChunkWriter::new(dir.path().join("buf"), 1024).unwrap();
        assert_eq!(writer.capacity(), 1024);
        assert_eq!(writer.position(), 0);
        assert!(writer.is_empty());
        assert_eq!(std::fs::metadata(writer.path()).unwrap().len(), 1024);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempdir().unwrap();
        assert!(MappedChunkWriter::new(dir.path().join("buf"), 0).is_err());
    }

    #[test]
    fn test_writes_advance_cursor() {
        let dir = tempdir().unwrap();
        let mut writer = MappedChunkWriter::new(dir.path().join("buf"), 64).unwrap();

        writer.write_u8(1).unwrap();
        writer.write_u32(2).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_text("ab").unwrap();
        writer.write_f64(1.5).unwrap();

        assert_eq!(writer.position(), 1 + 4 + 2 + 3 + 8);
        assert_eq!(&writer.as_bytes()[..5], &[1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_overflow_leaves_cursor() {
        let dir = tempdir().unwrap();
        let mut writer = MappedChunkWriter::new(dir.path().join("buf"), 8).unwrap();
        writer.write_u32(7).unwrap();

        let err = writer.write_u64(1).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::BufferOverflow {
                requested: 8,
                available: 4
            }
        ));
        assert!(writer.write_text("hello").is_err());
        assert_eq!(writer.position(), 4);
    }

    #[test]
    fn test_explicit_offset_patch() {
        let dir = tempdir().unwrap();
        let mut writer = MappedChunkWriter::new(dir.path().join("buf"), 32).unwrap();
        writer.write_u32(0).unwrap();
        writer.write_bytes(b"xyz").unwrap();
        writer.write_u32_at(0, 3).unwrap();

        assert_eq!(writer.as_bytes(), &[0, 0, 0, 3, b'x', b'y', b'z']);
        assert_eq!(writer.position(), 7);
        assert!(writer.write_u32_at(5, 1).is_err());
    }

    #[test]
    fn test_export_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut writer = MappedChunkWriter::new(dir.path().join("buf"), 128).unwrap();
        writer.write_bytes(b"segment").unwrap();

        let first = writer.export_bytes();
        let second = writer.export_bytes();
        let mut sink = Vec::new();
        writer.copy_to(&mut sink).unwrap();
        writer.copy_to(&mut sink).unwrap();

        assert_eq!(first, b"segment");
        assert_eq!(first, second);
        assert_eq!(sink, b"segmentsegment");
        assert_eq!(writer.position(), 7);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let dir = tempdir().unwrap();
        let mut writer = MappedChunkWriter::new(dir.path().join("buf"), 16).unwrap();
        writer.write_u64(9).unwrap();
        writer.force().unwrap();
        writer.reset();

        assert_eq!(writer.position(), 0);
        assert_eq!(writer.capacity(), 16);
        assert!(writer.export_bytes().is_empty());
    }

    proptest! {
        #[test]
        fn prop_can_fit_matches_remaining(writes in proptest::collection::vec(0usize..40, 0..20)) {
            let dir = tempdir().unwrap();
            let mut writer = MappedChunkWriter::new(dir.path().join("buf"), 256).unwrap();
            for len in writes {
                let _ = writer.write_bytes(&vec![0xAB; len]);
                prop_assert_eq!(writer.capacity(), 256);
                let remaining = writer.capacity() - writer.position();
                prop_assert!(writer.can_fit(remaining));
                prop_assert!(!writer.can_fit(remaining + 1));
            }
        }
    }
}
