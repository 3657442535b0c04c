// src/recording/recorder.rs
//! Recording assembler
//!
//! A [`Recording`] owns the type registry, the constant pools and the
//! per-thread buffers of one recording. Any number of threads may write
//! events concurrently; `close` assembles a single chunk:
//!
//! ```text
//! F L R 0x00 | metadata offset (u64) | thread segments... | checkpoint | metadata
//! ```

use crate::format::{fields, BODY_START, STREAM_HEADER};
use crate::observability::metric_names;
use crate::recording::chunk_manager::{current_thread_id, ManagerStats, ThreadChunkManager};
use crate::recording::compressor::Compressor;
use crate::recording::constant_pool::ConstantPools;
use crate::recording::encoder::{encode_buffer_lost, ValueEncoder};
use crate::recording::metadata::{build_metadata, encode_checkpoint, encode_metadata, ChunkTimes};
use crate::recording::storage::SegmentStorage;
use crate::recording::types::{names, EventTraits, Type, TypeRegistry, TypeStructureBuilder};
use crate::recording::value::{FieldValue, TypedValue, TypedValueBuilder};
use crate::utils::config::RecorderConfig;
use crate::utils::errors::{RecordingError, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tick frequency of the writer clock
pub const TICKS_PER_SECOND: u64 = 1_000_000_000;

/// One recording being written into `W`
pub struct Recording<W: Write + Send = Vec<u8>> {
    config: RecorderConfig,
    registry: TypeRegistry,
    pools: ConstantPools,
    manager: ThreadChunkManager,
    clock: Instant,
    start_ticks: i64,
    start_time_nanos: i64,
    max_end_ticks: AtomicI64,
    /// `true` once closed; writers hold the read side
    closed: RwLock<bool>,
    sink: Mutex<Option<W>>,
    threads: DashMap<u64, TypedValue>,
    events: AtomicU64,
    bytes: AtomicU64,
    lost: AtomicU64,
}

impl Recording<Vec<u8>> {
    /// Record into memory; [`finish`](Recording::finish) returns the bytes
    pub fn in_memory(config: RecorderConfig) -> Result<Self> {
        Self::with_config(Vec::new(), config)
    }
}

impl Recording<BufWriter<File>> {
    /// Record into a new file at `path`
    pub fn to_file<P: AsRef<Path>>(path: P, config: RecorderConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            RecordingError::StorageFailed(format!(
                "Failed to create {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::with_config(BufWriter::new(file), config)
    }
}

impl<W: Write + Send> Recording<W> {
    pub fn new(sink: W) -> Result<Self> {
        Self::with_config(sink, RecorderConfig::default())
    }

    pub fn with_config(sink: W, config: RecorderConfig) -> Result<Self> {
        config.validate()?;

        let storage = match &config.spill_dir {
            Some(dir) => SegmentStorage::new(dir.join(format!("flightrec-{}", ulid::Ulid::new())), true)?,
            None => SegmentStorage::temporary()?,
        };
        let manager = ThreadChunkManager::new(Arc::new(storage), config.buffer_size)?;

        let start_ticks = config.start_ticks.unwrap_or(0);
        let start_time_nanos = config
            .start_time_nanos
            .or_else(|| Utc::now().timestamp_nanos_opt())
            .unwrap_or(0);

        info!(
            "Recording started: {} byte buffers, spill dir {}",
            config.buffer_size,
            manager.storage().root().display()
        );

        Ok(Self {
            registry: TypeRegistry::new()?,
            pools: ConstantPools::new(),
            manager,
            clock: Instant::now(),
            start_ticks,
            start_time_nanos,
            max_end_ticks: AtomicI64::new(start_ticks),
            closed: RwLock::new(false),
            sink: Mutex::new(Some(sink)),
            threads: DashMap::new(),
            events: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn pools(&self) -> &ConstantPools {
        &self.pools
    }

    /// Current value of the tick clock
    pub fn ticks(&self) -> i64 {
        let elapsed = i64::try_from(self.clock.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.start_ticks.saturating_add(elapsed)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Register a constant-pool backed type
    pub fn register_type(
        &self,
        name: &str,
        supertype: Option<&str>,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        self.registry.register_type(name, supertype, build)
    }

    pub fn register_event_type(&self, name: &str, build: impl FnOnce(&mut TypeStructureBuilder)) -> Result<Arc<Type>> {
        self.registry.register_event_type(name, build)
    }

    pub fn register_event_type_with(
        &self,
        name: &str,
        traits: EventTraits,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        self.registry.register_event_type_with(name, traits, build)
    }

    pub fn register_annotation_type(
        &self,
        name: &str,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        self.registry.register_annotation_type(name, build)
    }

    /// Build a value of a registered type
    pub fn value_of(&self, ty: &Arc<Type>, build: impl FnOnce(&mut TypedValueBuilder<'_>)) -> Result<TypedValue> {
        self.registry.value_of(ty, build)
    }

    /// Write one event of `ty` on the calling thread
    pub fn write_event(&self, ty: &Arc<Type>, build: impl FnOnce(&mut TypedValueBuilder<'_>)) -> Result<()> {
        let event = self.registry.value_of(ty, build)?;
        self.write_event_value(&event)
    }

    /// Write a prepared event value. Implicit fields left unset get the
    /// current tick, the calling thread and a null stack trace.
    pub fn write_event_value(&self, event: &TypedValue) -> Result<()> {
        let closed = self.closed.read();
        if *closed {
            return Err(RecordingError::Closed);
        }
        if !event.get_type().is_event() {
            return Err(RecordingError::argument(format!(
                "'{}' is not an event type",
                event.get_type().name()
            )));
        }

        let thread_id = current_thread_id();
        let now = self.ticks();
        let thread = self.thread_value(thread_id)?;
        let event = event.with_defaults(|field| match field.name() {
            fields::END_TIME => Some(FieldValue::Long(now)),
            fields::START_TIME => Some(FieldValue::Long(0)),
            fields::EVENT_THREAD => Some(FieldValue::Value(thread.clone())),
            _ => None,
        });
        let end_ticks = match event.field_value(fields::END_TIME) {
            Some(FieldValue::Long(ticks)) => *ticks,
            _ => now,
        };

        let record = ValueEncoder::new(&self.registry, &self.pools).encode_event(&event)?;
        match self.manager.write_record(thread_id, &record) {
            Ok(()) => {}
            Err(RecordingError::RecordTooLarge { size, capacity }) => {
                self.write_buffer_lost(thread_id, &thread, now, size)?;
                return Err(RecordingError::RecordTooLarge { size, capacity });
            }
            Err(e) => return Err(e),
        }

        self.max_end_ticks.fetch_max(end_ticks, Ordering::AcqRel);
        self.events.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(record.len() as u64, Ordering::Relaxed);
        metrics::counter!(metric_names::EVENTS_WRITTEN).increment(1);
        metrics::counter!(metric_names::BYTES_WRITTEN).increment(record.len() as u64);
        Ok(())
    }

    fn write_buffer_lost(&self, thread_id: u64, thread: &TypedValue, now: i64, size: usize) -> Result<()> {
        warn!(
            "Dropping {} byte event on thread {}: larger than the {} byte buffer",
            size, thread_id, self.config.buffer_size
        );
        let thread_type = thread.get_type();
        let index = self
            .pools
            .intern(&self.registry, thread_type, &FieldValue::Value(thread.clone()))?
            .index();
        let record = encode_buffer_lost(now, index, size as u64)?;
        self.manager.write_record(thread_id, &record)?;

        self.max_end_ticks.fetch_max(now, Ordering::AcqRel);
        self.lost.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_names::BUFFER_LOST).increment(1);
        Ok(())
    }

    /// Cached `Thread` value describing `thread_id`
    fn thread_value(&self, thread_id: u64) -> Result<TypedValue> {
        if let Some(value) = self.threads.get(&thread_id) {
            return Ok(value.clone());
        }

        let ty = self.registry.get(names::THREAD).ok_or_else(|| {
            RecordingError::argument(format!("type '{}' is not registered", names::THREAD))
        })?;
        let name = std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("thread-{}", thread_id));
        let value = self.registry.value_of(&ty, |b| {
            b.put("name", name.as_str())
                .put("osThreadId", thread_id as i64)
                .put("threadId", thread_id as i64);
        })?;
        self.threads.insert(thread_id, value.clone());
        Ok(value)
    }

    /// Flush the calling thread's buffer to a segment in the background
    pub fn rotate_chunk(&self) -> Result<bool> {
        let closed = self.closed.read();
        if *closed {
            return Err(RecordingError::Closed);
        }
        self.manager.rotate_chunk(current_thread_id())
    }

    /// Assemble the chunk into the sink and release all buffers. Calling it
    /// again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.write();
        if *closed {
            return Ok(());
        }
        *closed = true;

        let result = self.assemble();
        if let Err(e) = self.manager.cleanup() {
            warn!("Failed to clean up spill files: {}", e);
        }
        result
    }

    /// Close and hand back the sink
    pub fn finish(self) -> Result<W> {
        self.close()?;
        self.sink.lock().take().ok_or(RecordingError::Closed)
    }

    fn assemble(&self) -> Result<()> {
        self.manager.final_flush()?;

        let end_ticks = self.ticks().max(self.max_end_ticks.load(Ordering::Acquire));
        let body_len = self.manager.storage().total_len();
        let checkpoint_offset = BODY_START as u64 + body_len;
        let checkpoint = encode_checkpoint(&self.registry, &self.pools, end_ticks, 0)?;
        let metadata_offset = checkpoint_offset + checkpoint.len() as u64;

        let times = ChunkTimes {
            start_time_nanos: self.start_time_nanos,
            end_time_nanos: self
                .start_time_nanos
                .saturating_add(end_ticks.saturating_sub(self.start_ticks)),
            start_ticks: self.start_ticks,
            ticks_per_second: TICKS_PER_SECOND,
        };
        let metadata = encode_metadata(&build_metadata(
            &self.registry,
            &self.config.producer,
            times,
            checkpoint_offset,
        )?)?;

        let mut guard = self.sink.lock();
        let sink = guard.as_mut().ok_or(RecordingError::Closed)?;
        match self.config.compression {
            Some(level) => {
                let mut encoder = Compressor::new(level).stream_encoder(&mut *sink)?;
                self.write_chunk(&mut encoder, metadata_offset, body_len, &checkpoint, &metadata)?;
                encoder.finish().map_err(|e| {
                    RecordingError::CompressionFailed(format!("Failed to finish stream: {}", e))
                })?;
            }
            None => self.write_chunk(sink, metadata_offset, body_len, &checkpoint, &metadata)?,
        }
        sink.flush()?;

        info!(
            "Recording closed: {} events, {} bytes of records, {} lost",
            self.events.load(Ordering::Relaxed),
            body_len,
            self.lost.load(Ordering::Relaxed)
        );
        Ok(())
    }

    fn write_chunk<S: Write + ?Sized>(
        &self,
        out: &mut S,
        metadata_offset: u64,
        body_len: u64,
        checkpoint: &[u8],
        metadata: &[u8],
    ) -> Result<()> {
        out.write_all(&STREAM_HEADER)?;
        out.write_all(&metadata_offset.to_be_bytes())?;
        let copied = self.manager.storage().copy_segments_to(out)?;
        if copied != body_len {
            return Err(RecordingError::StorageFailed(format!(
                "Copied {} segment bytes, expected {}",
                copied, body_len
            )));
        }
        out.write_all(checkpoint)?;
        out.write_all(metadata)?;
        debug!(
            "Wrote chunk: {} body bytes, {} checkpoint bytes, {} metadata bytes",
            body_len,
            checkpoint.len(),
            metadata.len()
        );
        Ok(())
    }

    pub fn stats(&self) -> RecordingStats {
        RecordingStats {
            events_written: self.events.load(Ordering::Relaxed),
            bytes_written: self.bytes.load(Ordering::Relaxed),
            events_lost: self.lost.load(Ordering::Relaxed),
            pool_entries: self.pools.total_entries(),
            buffers: self.manager.stats(),
        }
    }
}

impl<W: Write + Send> Drop for Recording<W> {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                warn!("Failed to close recording on drop: {}", e);
            }
        }
    }
}

/// Recording statistics
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStats {
    pub events_written: u64,
    pub bytes_written: u64,
    /// Events replaced by a buffer-lost marker
    pub events_lost: u64,
    pub pool_entries: usize,
    pub buffers: ManagerStats,
}

impl RecordingStats {
    pub fn avg_event_size(&self) -> u64 {
        if self.events_written == 0 {
            0
        } else {
            self.bytes_written / self.events_written
        }
    }
}
