// src/parser/metadata.rs
//! Chunk metadata decoding and validation
//!
//! The metadata record is decoded once per chunk. Besides the catalog of
//! producers, event types and content types it carries the tick basis used
//! to turn tick counts into absolute nanosecond timestamps.

use crate::codec::Offset;
use crate::format::{
    content_type, ContentTypeDescriptor, EventTypeDescriptor, MetadataRecord,
    ProducerDescriptor, Relation, ValueDescriptor, EVENT_METADATA, FIRST_TYPE_ID,
};
use crate::utils::errors::{RecordingError, Result};
use std::collections::HashMap;
use tracing::debug;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Tick to time conversion basis of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBasis {
    pub start_time_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: u64,
}

impl TimeBasis {
    /// Absolute epoch nanoseconds for a tick counter value
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        let elapsed = self.ticks_span_to_nanos(ticks as i128 - self.start_ticks as i128);
        saturate(self.start_time_nanos as i128 + elapsed as i128)
    }

    /// Nanoseconds covered by a tick span
    pub fn tick_span_to_nanos(&self, ticks: i64) -> i64 {
        self.ticks_span_to_nanos(ticks as i128)
    }

    fn ticks_span_to_nanos(&self, ticks: i128) -> i64 {
        saturate(ticks * NANOS_PER_SECOND / self.ticks_per_second as i128)
    }
}

fn saturate(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Validated, indexed metadata of one chunk
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    record: MetadataRecord,
    /// Event type id -> (producer index, event type index)
    event_types: HashMap<u64, (usize, usize)>,
    /// Content type id -> (producer index, content type index)
    content_types: HashMap<u64, (usize, usize)>,
}

impl ChunkMetadata {
    /// Decode the metadata record whose length prefix starts at `metadata_offset`
    pub fn read(chunk: &[u8], metadata_offset: usize) -> Result<Self> {
        let mut offset = Offset::new(chunk, metadata_offset)?;
        let type_id = offset.read_u64()?;
        if type_id != EVENT_METADATA {
            return Err(RecordingError::format(format!(
                "expected metadata record at offset {}, found record type {}",
                metadata_offset, type_id
            )));
        }

        let record = MetadataRecord::decode(&mut offset)?;
        let metadata = Self::from_record(record)?;
        debug!(
            "Decoded chunk metadata: {} producers, {} event types, {} content types",
            metadata.record.producers.len(),
            metadata.event_types.len(),
            metadata.content_types.len()
        );
        Ok(metadata)
    }

    /// Index and validate an already decoded record
    pub fn from_record(record: MetadataRecord) -> Result<Self> {
        if record.ticks_per_second == 0 {
            return Err(RecordingError::format("ticks per second must not be zero"));
        }

        let mut event_types = HashMap::new();
        let mut content_types = HashMap::new();

        for (p, producer) in record.producers.iter().enumerate() {
            for (i, event_type) in producer.event_types.iter().enumerate() {
                if event_type.id < FIRST_TYPE_ID {
                    return Err(RecordingError::format(format!(
                        "event type '{}' uses reserved id {}",
                        event_type.name, event_type.id
                    )));
                }
                if event_types.insert(event_type.id, (p, i)).is_some() {
                    return Err(RecordingError::format(format!(
                        "duplicate event type id {}",
                        event_type.id
                    )));
                }
            }

            for (i, content) in producer.content_types.iter().enumerate() {
                if !content_type::is_pool(content.id) {
                    return Err(RecordingError::format(format!(
                        "content type '{}' uses non-pool id {}",
                        content.name, content.id
                    )));
                }
                if content_types.insert(content.id, (p, i)).is_some() {
                    return Err(RecordingError::format(format!(
                        "duplicate content type id {}",
                        content.id
                    )));
                }
            }
        }

        let metadata = Self {
            record,
            event_types,
            content_types,
        };
        metadata.check_references()?;
        Ok(metadata)
    }

    fn check_references(&self) -> Result<()> {
        for producer in &self.record.producers {
            for event_type in &producer.event_types {
                self.check_fields(&event_type.name, &event_type.fields)?;
            }
            for content in &producer.content_types {
                self.check_fields(&content.name, &content.fields)?;
            }
        }
        Ok(())
    }

    fn check_fields(&self, owner: &str, fields: &[ValueDescriptor]) -> Result<()> {
        for field in fields {
            if content_type::is_pool(field.content_type)
                && !self.content_types.contains_key(&field.content_type)
            {
                return Err(RecordingError::format(format!(
                    "field '{}.{}' references content type {} which has no descriptor",
                    owner, field.identifier, field.content_type
                )));
            }
            self.check_fields(owner, &field.children)?;
        }
        Ok(())
    }

    pub fn record(&self) -> &MetadataRecord {
        &self.record
    }

    pub fn producers(&self) -> &[ProducerDescriptor] {
        &self.record.producers
    }

    pub fn previous_checkpoint(&self) -> u64 {
        self.record.previous_checkpoint
    }

    pub fn start_time_nanos(&self) -> i64 {
        self.record.start_time_nanos
    }

    pub fn end_time_nanos(&self) -> i64 {
        self.record.end_time_nanos
    }

    pub fn start_ticks(&self) -> i64 {
        self.record.start_ticks
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.record.ticks_per_second
    }

    pub fn time_basis(&self) -> TimeBasis {
        TimeBasis {
            start_time_nanos: self.record.start_time_nanos,
            start_ticks: self.record.start_ticks,
            ticks_per_second: self.record.ticks_per_second,
        }
    }

    pub fn event_type(&self, id: u64) -> Option<&EventTypeDescriptor> {
        self.event_types
            .get(&id)
            .map(|&(p, i)| &self.record.producers[p].event_types[i])
    }

    /// All event types with the URI of the producer that declared them
    pub fn event_types(&self) -> impl Iterator<Item = (&ProducerDescriptor, &EventTypeDescriptor)> {
        self.record
            .producers
            .iter()
            .flat_map(|p| p.event_types.iter().map(move |e| (p, e)))
    }

    pub fn content_type(&self, id: u64) -> Option<&ContentTypeDescriptor> {
        self.content_types
            .get(&id)
            .map(|&(p, i)| &self.record.producers[p].content_types[i])
    }

    pub fn relation(&self, id: u64) -> Option<&Relation> {
        self.record
            .producers
            .iter()
            .flat_map(|p| p.relations.iter())
            .find(|r| r.id == id)
    }
}
