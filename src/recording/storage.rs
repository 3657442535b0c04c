// src/recording/storage.rs
//! Spill directory for mapped buffers and flushed chunk segments
//!
//! Layout under the root directory:
//!
//! ```text
//! buffers/thread-{tid}-{slot}.buf     mapped per-thread buffers
//! chunks/chunk-{tid}-{seq:08}.seg     flushed segments, in write order per thread
//! ```

use crate::utils::errors::{RecordingError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BUFFERS_DIR: &str = "buffers";
const CHUNKS_DIR: &str = "chunks";

/// One flushed segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub thread_id: u64,
    pub sequence: u64,
    pub path: PathBuf,
    pub len: u64,
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub segments: u64,
    pub total_size_bytes: u64,
}

/// Files backing one recording
pub struct SegmentStorage {
    root: PathBuf,
    owns_root: bool,
    segments: Mutex<Vec<SegmentInfo>>,
}

impl SegmentStorage {
    /// Use `root`, creating it and its subdirectories.
    ///
    /// With `owns_root` the whole directory is removed by [`cleanup`](Self::cleanup).
    pub fn new<P: AsRef<Path>>(root: P, owns_root: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join(BUFFERS_DIR), root.join(CHUNKS_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| {
                RecordingError::StorageFailed(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        info!("Segment storage initialized at {}", root.display());

        Ok(Self {
            root,
            owns_root,
            segments: Mutex::new(Vec::new()),
        })
    }

    /// Fresh directory under the system temp dir, removed on cleanup
    pub fn temporary() -> Result<Self> {
        let root = std::env::temp_dir().join(format!("flightrec-{}", ulid::Ulid::new()));
        Self::new(root, true)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing file of a thread's buffer; `slot` is 0 or 1
    pub fn buffer_path(&self, thread_id: u64, slot: u8) -> PathBuf {
        self.root
            .join(BUFFERS_DIR)
            .join(format!("thread-{}-{}.buf", thread_id, slot))
    }

    pub fn segment_path(&self, thread_id: u64, sequence: u64) -> PathBuf {
        self.root
            .join(CHUNKS_DIR)
            .join(format!("chunk-{}-{:08}.seg", thread_id, sequence))
    }

    /// Durably write one segment
    pub fn write_segment(&self, thread_id: u64, sequence: u64, data: &[u8]) -> Result<SegmentInfo> {
        let path = self.segment_path(thread_id, sequence);

        let mut file = File::create(&path).map_err(|e| {
            RecordingError::StorageFailed(format!("Failed to create segment file: {}", e))
        })?;
        file.write_all(data).map_err(|e| {
            RecordingError::StorageFailed(format!("Failed to write segment file: {}", e))
        })?;
        file.sync_data().map_err(|e| {
            RecordingError::StorageFailed(format!("Failed to sync segment file: {}", e))
        })?;

        debug!(
            "Wrote segment {} of thread {} ({} bytes)",
            sequence,
            thread_id,
            data.len()
        );

        let info = SegmentInfo {
            thread_id,
            sequence,
            path,
            len: data.len() as u64,
        };
        self.segments.lock().push(info.clone());
        Ok(info)
    }

    /// Flushed segments ordered by thread, then by write order
    pub fn segments(&self) -> Vec<SegmentInfo> {
        let mut segments = self.segments.lock().clone();
        segments.sort_by_key(|s| (s.thread_id, s.sequence));
        segments
    }

    /// Sum of all segment lengths
    pub fn total_len(&self) -> u64 {
        self.segments.lock().iter().map(|s| s.len).sum()
    }

    /// Stream every segment into `sink`, returning the bytes copied
    pub fn copy_segments_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64> {
        let mut copied = 0;
        for segment in self.segments() {
            let mut file = File::open(&segment.path).map_err(|e| {
                RecordingError::StorageFailed(format!(
                    "Failed to open segment {}: {}",
                    segment.path.display(),
                    e
                ))
            })?;
            let n = io::copy(&mut file, sink)?;
            if n != segment.len {
                return Err(RecordingError::StorageFailed(format!(
                    "Segment {} holds {} bytes, expected {}",
                    segment.path.display(),
                    n,
                    segment.len
                )));
            }
            copied += n;
        }
        Ok(copied)
    }

    pub fn stats(&self) -> StorageStats {
        let segments = self.segments.lock();
        StorageStats {
            segments: segments.len() as u64,
            total_size_bytes: segments.iter().map(|s| s.len).sum(),
        }
    }

    /// Delete all flushed segments, and the root directory when owned
    pub fn cleanup(&self) -> Result<()> {
        let segments = std::mem::take(&mut *self.segments.lock());
        for segment in &segments {
            if let Err(e) = fs::remove_file(&segment.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", segment.path.display(), e);
                }
            }
        }

        if self.owns_root && self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| {
                RecordingError::StorageFailed(format!(
                    "Failed to remove {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        }

        debug!("Removed {} segments", segments.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_storage_creation() {
        let dir = tempdir().unwrap();
        let storage = SegmentStorage::new(dir.path().join("rec"), false).unwrap();
        assert!(storage.root().join(BUFFERS_DIR).is_dir());
        assert!(storage.root().join(CHUNKS_DIR).is_dir());
        assert_eq!(storage.stats().segments, 0);
    }

    #[test]
    fn test_segments_sorted_per_thread() {
        let dir = tempdir().unwrap();
        let storage = SegmentStorage::new(dir.path(), false).unwrap();

        storage.write_segment(2, 0, b"c").unwrap();
        storage.write_segment(1, 1, b"b").unwrap();
        storage.write_segment(1, 0, b"a").unwrap();

        let order: Vec<(u64, u64)> = storage
            .segments()
            .iter()
            .map(|s| (s.thread_id, s.sequence))
            .collect();
        assert_eq!(order, vec![(1, 0), (1, 1), (2, 0)]);

        let mut out = Vec::new();
        assert_eq!(storage.copy_segments_to(&mut out).unwrap(), 3);
        assert_eq!(out, b"abc");
        assert_eq!(storage.total_len(), 3);
    }

    #[test]
    fn test_cleanup_removes_segments() {
        let dir = tempdir().unwrap();
        let storage = SegmentStorage::new(dir.path(), false).unwrap();
        let info = storage.write_segment(1, 0, b"data").unwrap();
        assert!(info.path.exists());

        storage.cleanup().unwrap();
        assert!(!info.path.exists());
        assert!(storage.segments().is_empty());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_temporary_root_removed() {
        let storage = SegmentStorage::temporary().unwrap();
        let root = storage.root().to_path_buf();
        storage.write_segment(1, 0, b"x").unwrap();
        assert!(root.exists());

        storage.cleanup().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_paths() {
        let dir = tempdir().unwrap();
        let storage = SegmentStorage::new(dir.path(), false).unwrap();
        assert!(storage
            .segment_path(3, 12)
            .ends_with("chunks/chunk-3-00000012.seg"));
        assert!(storage.buffer_path(3, 1).ends_with("buffers/thread-3-1.buf"));
    }
}
