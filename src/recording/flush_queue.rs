// src/recording/flush_queue.rs
//! Background flush path for rotated buffers
//!
//! A single flusher thread drains jobs in submission order, so segments of
//! one thread land on disk in the order they were rotated out. After writing
//! a segment the buffer is reset and handed back to its owner as the new
//! standby.

use crate::observability::metric_names;
use crate::recording::mmap_writer::MappedChunkWriter;
use crate::recording::storage::SegmentStorage;
use crate::utils::errors::{RecordingError, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// A filled buffer waiting to be written as a segment
pub struct FlushJob {
    pub thread_id: u64,
    pub sequence: u64,
    pub writer: MappedChunkWriter,
    /// Receives the reset buffer once the segment is written
    pub reply: Sender<MappedChunkWriter>,
}

#[derive(Default)]
struct FlushShared {
    pending: Mutex<usize>,
    idle: Condvar,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    errors: Mutex<Vec<RecordingError>>,
}

/// A job the queue did not accept
pub struct Rejected {
    pub job: FlushJob,
    pub error: RecordingError,
}

/// Single-threaded flush queue
pub struct FlushQueue {
    sender: Mutex<Option<Sender<FlushJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<FlushShared>,
}

impl FlushQueue {
    /// Spawn the flusher thread
    pub fn start(storage: Arc<SegmentStorage>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(FlushShared::default());

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("flightrec-flusher".to_string())
            .spawn(move || run_flusher(receiver, storage, worker_shared))
            .map_err(|e| {
                RecordingError::StorageFailed(format!("Failed to start flusher thread: {}", e))
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            shared,
        })
    }

    /// Queue a buffer for flushing
    pub fn submit(&self, job: FlushJob) -> Result<()> {
        self.try_submit(job).map_err(|rejected| rejected.error)
    }

    /// Queue a buffer for flushing, handing the job back when it was not
    /// accepted
    pub fn try_submit(&self, job: FlushJob) -> std::result::Result<(), Rejected> {
        let sender = match self.sender.lock().clone() {
            Some(sender) => sender,
            None => {
                return Err(Rejected {
                    job,
                    error: RecordingError::Closed,
                })
            }
        };

        *self.shared.pending.lock() += 1;
        if let Err(crossbeam_channel::SendError(job)) = sender.send(job) {
            self.finish_one();
            return Err(Rejected {
                job,
                error: RecordingError::StorageFailed(
                    "Flusher thread is no longer running".to_string(),
                ),
            });
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Block until every submitted job has been written or has failed
    pub fn await_pending(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.idle.wait(&mut pending);
        }
    }

    /// Errors of failed flushes since the last call
    pub fn take_errors(&self) -> Vec<RecordingError> {
        std::mem::take(&mut *self.shared.errors.lock())
    }

    /// Stop accepting jobs and join the flusher once it drains
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Flusher thread panicked");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            bytes_flushed: self.shared.bytes.load(Ordering::Relaxed),
            pending: *self.shared.pending.lock(),
        }
    }

    fn finish_one(&self) {
        finish_one(&self.shared);
    }
}

impl Drop for FlushQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn finish_one(shared: &FlushShared) {
    let mut pending = shared.pending.lock();
    *pending = pending.saturating_sub(1);
    if *pending == 0 {
        shared.idle.notify_all();
    }
}

fn run_flusher(receiver: Receiver<FlushJob>, storage: Arc<SegmentStorage>, shared: Arc<FlushShared>) {
    debug!("Flusher started");

    for job in receiver.iter() {
        let FlushJob {
            thread_id,
            sequence,
            mut writer,
            reply,
        } = job;

        match storage.write_segment(thread_id, sequence, writer.as_bytes()) {
            Ok(info) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
                shared.bytes.fetch_add(info.len, Ordering::Relaxed);
                metrics::counter!(metric_names::SEGMENTS_FLUSHED).increment(1);
            }
            Err(e) => {
                error!("Flush of segment {} for thread {} failed: {}", sequence, thread_id, e);
                shared.failed.fetch_add(1, Ordering::Relaxed);
                shared.errors.lock().push(e);
            }
        }

        writer.reset();
        // The owner may be gone already
        let _ = reply.send(writer);
        finish_one(&shared);
    }

    debug!("Flusher stopped");
}

/// Flush queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Jobs accepted
    pub submitted: u64,

    /// Segments written
    pub completed: u64,

    /// Segments that failed to write
    pub failed: u64,

    /// Bytes written to segments
    pub bytes_flushed: u64,

    /// Jobs not yet finished
    pub pending: usize,
}

impl QueueStats {
    /// Percentage of finished jobs that failed
    pub fn failure_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            (self.failed as f64 / finished as f64) * 100.0
        }
    }
}
