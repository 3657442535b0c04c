// src/parser/mod.rs
//! Recording reader
//!
//! Decoding of one chunk is single threaded and synchronous. Chunks are
//! independent, so [`loader::load_events_with`] can decode them on several
//! threads when [`ParserOptions::parallel_chunks`] is set.

pub mod chunk;
pub mod constants;
pub mod dispatcher;
pub mod exporter;
pub mod loader;
pub mod metadata;
pub mod readers;
pub mod sink;
pub mod value;

pub use chunk::{parse_chunk, split_chunks, split_chunks_with, ChunkHeader, ChunkStats};
pub use constants::{ConstantMap, ConstantPools};
pub use dispatcher::{EventDispatcher, ParserOptions};
pub use exporter::{ExportFormat, Exporter};
pub use loader::{load_events, load_events_with, load_file, parse_recording, read_chunk_metadata, ParseSummary};
pub use metadata::{ChunkMetadata, TimeBasis};
pub use readers::{ValueKind, ValueReader};
pub use sink::{CollectedType, EventCollection, EventCollector, EventSink, EventSinkFactory, EventTypeInfo, ValueField};
pub use value::{StructValue, Value};
