// src/recording/mod.rs
//! Event recording
//!
//! The writer half of the crate:
//!
//! - **Types**: registry of builtin, pool-backed, inline and event types
//! - **Values**: typed values and their builders
//! - **Constant Pools**: per-type deduplication of pooled values
//! - **Encoder / Metadata**: event, checkpoint and metadata records
//! - **Mmap Writer**: fixed-capacity memory-mapped buffers
//! - **Chunk Manager**: per-thread double buffering over a background flusher
//! - **Recorder**: the [`Recording`] assembler
//!
//! # Architecture
//!
//! ```text
//! write_event() → encode → thread's active buffer ──full──→ rotate
//!                                                            ↓
//!                                         flush queue → chunk segment files
//!                                                            ↓
//! close() → final flush → header + segments + checkpoint + metadata → sink
//! ```

pub mod chunk_manager;
pub mod compressor;
pub mod constant_pool;
pub mod encoder;
pub mod flush_queue;
pub mod metadata;
pub mod mmap_writer;
pub mod recorder;
pub mod storage;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use chunk_manager::{current_thread_id, ManagerStats, ThreadBuffer, ThreadChunkManager};
pub use compressor::{CompressionLevel, Compressor};
pub use constant_pool::{ConstantPool, ConstantPools, PooledValue};
pub use flush_queue::{FlushQueue, QueueStats, Rejected};
pub use mmap_writer::MappedChunkWriter;
pub use recorder::{Recording, RecordingStats, TICKS_PER_SECOND};
pub use storage::{SegmentInfo, SegmentStorage, StorageStats};
pub use types::{Builtin, EventTraits, Type, TypeRef, TypeRegistry, TypeStructureBuilder, TypedField};
pub use value::{FieldValue, TypedValue, TypedValueBuilder};
