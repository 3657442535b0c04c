// src/format/mod.rs
//! Recording wire format shared by the reader and the writer
//!
//! A stream is `F L R 0x00` followed by chunks. A chunk is an 8-byte
//! big-endian metadata offset, a body of length-prefixed records starting at
//! [`BODY_START`], and the metadata record last. Offsets are chunk-relative.

pub mod model;

pub use model::{
    ContentTypeDescriptor, DataType, EventTypeDescriptor, MetadataRecord, ProducerDescriptor,
    Relation, ValueDescriptor,
};

use crate::utils::errors::{RecordingError, Result};
use bytes::{BufMut, BytesMut};

/// Magic bytes and version at the start of every stream
pub const STREAM_HEADER: [u8; 4] = [b'F', b'L', b'R', VERSION];

pub const VERSION: u8 = 0;

/// Chunk-relative offset of the first body record
pub const BODY_START: usize = 8;

/// Reserved record type ids
pub const EVENT_METADATA: u64 = 0;
pub const EVENT_CHECKPOINT: u64 = 1;
pub const EVENT_BUFFER_LOST: u64 = 2;

/// Ids below this are reserved for built-in record and content types
pub const FIRST_TYPE_ID: u64 = 16;

/// Identifier of the built-in data loss event
pub const BUFFER_LOST_TYPE: &str = "flightrec.BufferLost";

/// Nesting limit for struct descriptors
pub const MAX_DESCRIPTOR_DEPTH: usize = 32;

/// Content type ids
pub mod content_type {
    pub const NONE: u64 = 0;
    pub const MEMORY: u64 = 1;
    pub const EPOCH_MILLIS: u64 = 2;
    pub const MILLIS: u64 = 3;
    pub const NANOS: u64 = 4;
    pub const TICKS: u64 = 5;
    pub const ADDRESS: u64 = 6;
    pub const THREAD: u64 = 7;
    pub const STACK_TRACE: u64 = 9;
    pub const PERCENTAGE: u64 = 11;
    pub const EPOCH_NANOS: u64 = 12;
    pub const TICKSPAN: u64 = 13;

    /// Built-in ids that name a constant pool rather than a unit
    pub fn is_builtin_pool(id: u64) -> bool {
        id == THREAD || id == STACK_TRACE
    }

    /// Ids at or above this always name a constant pool
    pub const FIRST_POOL: u64 = super::FIRST_TYPE_ID;

    pub fn is_pool(id: u64) -> bool {
        id >= FIRST_POOL || is_builtin_pool(id)
    }
}

/// Names of the implicit event fields
pub mod fields {
    pub const START_TIME: &str = "startTime";
    pub const END_TIME: &str = "endTime";
    pub const EVENT_THREAD: &str = "eventThread";
    pub const STACK_TRACE: &str = "stackTrace";
    pub const DATA_LOST: &str = "dataLost";
}

/// Append `payload` to `out` behind its 4-byte length prefix
pub fn write_record(out: &mut BytesMut, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        RecordingError::argument(format!(
            "record of {} bytes exceeds the 32-bit length prefix",
            payload.len()
        ))
    })?;
    out.reserve(payload.len() + 4);
    out.put_u32(len);
    out.put_slice(payload);
    Ok(())
}

/// Error for a stream whose version byte is not [`VERSION`]
pub fn unsupported_version(version: u8) -> RecordingError {
    RecordingError::format(format!("unsupported stream version {}", version))
}

/// True if `data` starts with the stream magic and a supported version
pub fn has_stream_header(data: &[u8]) -> bool {
    data.len() >= STREAM_HEADER.len() && data[..STREAM_HEADER.len()] == STREAM_HEADER
}
