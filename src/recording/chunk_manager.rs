// src/recording/chunk_manager.rs
//! Per-thread double buffering
//!
//! Every writing thread owns a pair of mapped buffers. Records go into the
//! active one; when a record does not fit, the pair is swapped and the full
//! buffer is handed to the flush queue. The next rotation waits for that
//! buffer to come back before reusing it, which keeps one thread's segments
//! in write order.

use crate::observability::metric_names;
use crate::recording::flush_queue::{FlushJob, FlushQueue, QueueStats};
use crate::recording::mmap_writer::MappedChunkWriter;
use crate::recording::storage::SegmentStorage;
use crate::utils::errors::{RecordingError, Result};
use crossbeam_channel::Receiver;
use dashmap::DashMap;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique id of the calling thread, starting at 1
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

enum Standby {
    Ready(MappedChunkWriter),
    /// Being flushed; the reset buffer arrives on the channel
    InFlight(Receiver<MappedChunkWriter>),
}

struct BufferPair {
    active: MappedChunkWriter,
    standby: Option<Standby>,
    sequence: u64,
}

/// The buffer pair of one thread
pub struct ThreadBuffer {
    thread_id: u64,
    pair: Mutex<BufferPair>,
}

impl ThreadBuffer {
    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Lock and return the active buffer
    pub fn active(&self) -> MappedMutexGuard<'_, MappedChunkWriter> {
        MutexGuard::map(self.pair.lock(), |pair| &mut pair.active)
    }

    /// Segments handed to the flush path so far
    pub fn sequence(&self) -> u64 {
        self.pair.lock().sequence
    }
}

/// Owns the buffer pairs of all writing threads
pub struct ThreadChunkManager {
    buffer_size: usize,
    storage: Arc<SegmentStorage>,
    flusher: FlushQueue,
    threads: DashMap<u64, Arc<ThreadBuffer>>,
    rotations: AtomicU64,
}

impl ThreadChunkManager {
    pub fn new(storage: Arc<SegmentStorage>, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(RecordingError::argument("buffer size must be positive"));
        }
        let flusher = FlushQueue::start(Arc::clone(&storage))?;
        Ok(Self {
            buffer_size,
            storage,
            flusher,
            threads: DashMap::new(),
            rotations: AtomicU64::new(0),
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn storage(&self) -> &Arc<SegmentStorage> {
        &self.storage
    }

    /// Buffer pair of `thread_id`, created on first access
    pub fn get_active_writer(&self, thread_id: u64) -> Result<Arc<ThreadBuffer>> {
        if let Some(buffer) = self.threads.get(&thread_id) {
            return Ok(Arc::clone(buffer.value()));
        }

        let entry = self.threads.entry(thread_id);
        let buffer = match entry {
            dashmap::mapref::entry::Entry::Occupied(existing) => Arc::clone(existing.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let active = MappedChunkWriter::new(self.storage.buffer_path(thread_id, 0), self.buffer_size)?;
                let standby = MappedChunkWriter::new(self.storage.buffer_path(thread_id, 1), self.buffer_size)?;
                debug!("Created buffer pair for thread {}", thread_id);

                let buffer = Arc::new(ThreadBuffer {
                    thread_id,
                    pair: Mutex::new(BufferPair {
                        active,
                        standby: Some(Standby::Ready(standby)),
                        sequence: 0,
                    }),
                });
                vacant.insert(Arc::clone(&buffer));
                buffer
            }
        };
        Ok(buffer)
    }

    /// Swap the buffers of `thread_id` and flush the full one in the
    /// background. Returns false when the active buffer was empty.
    pub fn rotate_chunk(&self, thread_id: u64) -> Result<bool> {
        let buffer = self.get_active_writer(thread_id)?;
        let mut pair = buffer.pair.lock();
        self.rotate_locked(thread_id, &mut pair)
    }

    /// Append one complete record to the thread's active buffer, rotating
    /// first when it does not fit.
    pub fn write_record(&self, thread_id: u64, record: &[u8]) -> Result<()> {
        if record.len() > self.buffer_size {
            return Err(RecordingError::RecordTooLarge {
                size: record.len(),
                capacity: self.buffer_size,
            });
        }

        let buffer = self.get_active_writer(thread_id)?;
        let mut pair = buffer.pair.lock();
        if !pair.active.can_fit(record.len()) {
            self.rotate_locked(thread_id, &mut pair)?;
        }
        pair.active.write_bytes(record)?;
        Ok(())
    }

    fn rotate_locked(&self, thread_id: u64, pair: &mut BufferPair) -> Result<bool> {
        if pair.active.is_empty() {
            return Ok(false);
        }

        let standby = match pair.standby.take() {
            Some(Standby::Ready(writer)) => writer,
            Some(Standby::InFlight(back)) => back.recv().map_err(|_| {
                RecordingError::StorageFailed(format!(
                    "Flusher dropped the standby buffer of thread {}",
                    thread_id
                ))
            })?,
            None => {
                return Err(RecordingError::StorageFailed(format!(
                    "Standby buffer of thread {} is unavailable",
                    thread_id
                )))
            }
        };

        let full = std::mem::replace(&mut pair.active, standby);
        let sequence = pair.sequence;
        pair.sequence += 1;

        let (reply, back) = crossbeam_channel::bounded(1);
        debug!(
            "Rotating thread {} buffer: segment {} with {} bytes",
            thread_id,
            sequence,
            full.position()
        );
        let submitted = self.flusher.try_submit(FlushJob {
            thread_id,
            sequence,
            writer: full,
            reply,
        });
        if let Err(rejected) = submitted {
            // Undo the swap so the thread keeps its data and both buffers
            let standby = std::mem::replace(&mut pair.active, rejected.job.writer);
            pair.standby = Some(Standby::Ready(standby));
            pair.sequence = sequence;
            return Err(rejected.error);
        }
        pair.standby = Some(Standby::InFlight(back));

        self.rotations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_names::CHUNK_ROTATIONS).increment(1);
        Ok(true)
    }

    /// Wait for background flushes, then write every thread's non-empty
    /// active buffer. All threads are attempted; the first error is returned.
    pub fn final_flush(&self) -> Result<()> {
        self.flusher.await_pending();
        let mut errors = self.flusher.take_errors();

        let buffers: Vec<Arc<ThreadBuffer>> =
            self.threads.iter().map(|entry| Arc::clone(entry.value())).collect();

        for buffer in buffers {
            let mut pair = buffer.pair.lock();
            if let Some(Standby::InFlight(back)) = pair.standby.take() {
                match back.recv() {
                    Ok(writer) => pair.standby = Some(Standby::Ready(writer)),
                    Err(_) => warn!("Standby buffer of thread {} was lost", buffer.thread_id),
                }
            }

            if pair.active.is_empty() {
                continue;
            }

            let sequence = pair.sequence;
            match self
                .storage
                .write_segment(buffer.thread_id, sequence, pair.active.as_bytes())
            {
                Ok(_) => {
                    pair.sequence += 1;
                    pair.active.reset();
                    metrics::counter!(metric_names::SEGMENTS_FLUSHED).increment(1);
                }
                Err(e) => errors.push(e),
            }
        }

        debug!("Final flush done, {} errors", errors.len());
        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    /// Stop the flusher, unmap every buffer and delete all spilled files
    pub fn cleanup(&self) -> Result<()> {
        self.flusher.shutdown();

        let mut paths: Vec<PathBuf> = Vec::new();
        let thread_ids: Vec<u64> = self.threads.iter().map(|entry| *entry.key()).collect();
        for thread_id in thread_ids {
            if let Some((_, buffer)) = self.threads.remove(&thread_id) {
                let pair = buffer.pair.lock();
                paths.push(pair.active.path().to_path_buf());
                if let Some(Standby::Ready(writer)) = &pair.standby {
                    paths.push(writer.path().to_path_buf());
                }
            }
        }

        // Mappings are released when the last handle to a pair goes away
        for path in paths {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove buffer file {}: {}", path.display(), e);
                }
            }
        }

        self.storage.cleanup()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            threads: self.threads.len(),
            rotations: self.rotations.load(Ordering::Relaxed),
            flush: self.flusher.stats(),
        }
    }
}

/// Buffer manager statistics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub threads: usize,
    pub rotations: u64,
    pub flush: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path, buffer_size: usize) -> ThreadChunkManager {
        let storage = Arc::new(SegmentStorage::new(dir, false).unwrap());
        ThreadChunkManager::new(storage, buffer_size).unwrap()
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());
        let other = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, other);
        assert!(here > 0 && other > 0);
    }

    #[test]
    fn test_pair_created_lazily() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 64);
        assert_eq!(manager.stats().threads, 0);

        let first = manager.get_active_writer(1).unwrap();
        let again = manager.get_active_writer(1).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.thread_id(), 1);
        assert_eq!(first.active().capacity(), 64);
        assert_eq!(manager.stats().threads, 1);
    }

    #[test]
    fn test_empty_buffer_not_rotated() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 64);
        assert!(!manager.rotate_chunk(1).unwrap());
        manager.final_flush().unwrap();
        assert!(manager.storage().segments().is_empty());
    }

    #[test]
    fn test_rotation_preserves_write_order() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 64);

        manager.write_record(1, &[1u8; 40]).unwrap();
        assert!(manager.rotate_chunk(1).unwrap());
        manager.write_record(1, &[2u8; 30]).unwrap();
        manager.final_flush().unwrap();

        let segments = manager.storage().segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len, 40);
        assert_eq!(segments[1].len, 30);

        let mut out = Vec::new();
        manager.storage().copy_segments_to(&mut out).unwrap();
        assert_eq!(&out[..40], &[1u8; 40][..]);
        assert_eq!(&out[40..], &[2u8; 30][..]);
    }

    #[test]
    fn test_write_rotates_when_full() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 32);

        for i in 0..10u8 {
            manager.write_record(7, &[i; 12]).unwrap();
        }
        manager.final_flush().unwrap();

        let mut out = Vec::new();
        manager.storage().copy_segments_to(&mut out).unwrap();
        let expected: Vec<u8> = (0..10u8).flat_map(|i| [i; 12]).collect();
        assert_eq!(out, expected);
        assert!(manager.stats().rotations >= 4);
        assert_eq!(manager.get_active_writer(7).unwrap().sequence(), 5);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 16);
        let err = manager.write_record(1, &[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::RecordTooLarge {
                size: 17,
                capacity: 16
            }
        ));
        assert_eq!(manager.stats().threads, 0);
    }

    #[test]
    fn test_threads_do_not_share_buffers() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 64);

        crossbeam::scope(|scope| {
            for t in 1..=4u64 {
                let manager = &manager;
                scope.spawn(move |_| {
                    for _ in 0..20 {
                        manager.write_record(t, &[t as u8; 10]).unwrap();
                    }
                });
            }
        })
        .unwrap();
        manager.final_flush().unwrap();

        for t in 1..=4u64 {
            let bytes: u64 = manager
                .storage()
                .segments()
                .iter()
                .filter(|s| s.thread_id == t)
                .map(|s| {
                    let data = std::fs::read(&s.path).unwrap();
                    assert!(data.iter().all(|&b| b == t as u8));
                    s.len
                })
                .sum();
            assert_eq!(bytes, 200);
        }
    }

    #[test]
    fn test_failed_handoff_restores_buffers() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 64);
        manager.write_record(1, b"first").unwrap();
        manager.flusher.shutdown();

        let err = manager.rotate_chunk(1).unwrap_err();
        assert!(matches!(err, RecordingError::Closed));
        let buffer = manager.get_active_writer(1).unwrap();
        assert_eq!(buffer.active().as_bytes(), b"first");
        assert_eq!(buffer.sequence(), 0);

        // a second attempt fails the same way instead of losing the standby
        assert!(matches!(manager.rotate_chunk(1), Err(RecordingError::Closed)));
        manager.write_record(1, b"-second").unwrap();

        manager.final_flush().unwrap();
        let mut out = Vec::new();
        manager.storage().copy_segments_to(&mut out).unwrap();
        assert_eq!(out, b"first-second");
    }

    #[test]
    fn test_cleanup_removes_files() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 64);
        manager.write_record(1, b"abc").unwrap();
        manager.final_flush().unwrap();
        let segment = manager.storage().segments()[0].path.clone();
        let buffer = manager.storage().buffer_path(1, 0);
        assert!(segment.exists() && buffer.exists());

        manager.cleanup().unwrap();
        assert!(!segment.exists());
        assert!(!buffer.exists());
        assert_eq!(manager.stats().threads, 0);
    }
}
