// src/parser/dispatcher.rs
//! Per-chunk event dispatch
//!
//! One decode plan is prepared for every event type declared in the chunk
//! metadata. The decoded tuple is always ordered
//! `[startTime] endTime [eventThread] [stackTrace] fields...`, with nested
//! struct fields flattened as `parent:child`. On the wire the end time comes
//! first, followed by the start time.

use crate::codec::Offset;
use crate::format::{
    content_type, fields, DataType, ValueDescriptor, BUFFER_LOST_TYPE, EVENT_BUFFER_LOST,
};
use crate::parser::constants::ConstantPools;
use crate::parser::metadata::ChunkMetadata;
use crate::parser::readers::{ReadContext, ValueKind, ValueReader};
use crate::parser::sink::{EventSink, EventSinkFactory, EventTypeInfo, ValueField};
use crate::parser::value::Value;
use crate::utils::errors::{RecordingError, Result};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Reader behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Skip records of undeclared event types by their declared length
    /// instead of failing the chunk
    pub skip_unknown_event_types: bool,
    /// Keep the complete leading chunks of a stream that was cut off
    /// mid-chunk, dropping the incomplete tail
    pub ignore_truncated_chunk: bool,
    /// Decode chunks on several threads when loading into memory
    pub parallel_chunks: bool,
}

struct EventPlan {
    identifier: String,
    label: String,
    description: String,
    category: Vec<String>,
    producer_uri: String,
    fields: Vec<ValueField>,
    has_start_time: bool,
    /// Readers after the implicit time fields, in wire order
    readers: Vec<ValueReader>,
    sink: Option<Box<dyn EventSink>>,
    values: Vec<Value>,
}

impl EventPlan {
    fn sink(&mut self, factory: &mut dyn EventSinkFactory) -> &mut Box<dyn EventSink> {
        let Self {
            sink,
            identifier,
            label,
            description,
            category,
            producer_uri,
            fields,
            ..
        } = self;
        sink.get_or_insert_with(|| {
            factory.create(&EventTypeInfo {
                identifier: identifier.as_str(),
                label: label.as_str(),
                description: description.as_str(),
                category: category.as_slice(),
                producer_uri: producer_uri.as_str(),
                fields: fields.as_slice(),
            })
        })
    }
}

/// Decodes event records of one chunk and forwards them to sinks
pub struct EventDispatcher {
    plans: HashMap<u64, EventPlan>,
    tick_reader: ValueReader,
    options: ParserOptions,
    skipped: u64,
    warned: HashSet<u64>,
}

impl EventDispatcher {
    pub fn new(metadata: &ChunkMetadata, options: ParserOptions) -> Result<Self> {
        let mut plans = HashMap::new();
        let tick_reader = ValueReader::scalar(DataType::S8, content_type::TICKS, fields::END_TIME, metadata)?;

        for (producer, event_type) in metadata.event_types() {
            let mut plan = EventPlan {
                identifier: event_type.name.clone(),
                label: event_type.label.clone(),
                description: event_type.description.clone(),
                category: event_type.category(),
                producer_uri: producer.uri.clone(),
                fields: Vec::new(),
                has_start_time: event_type.has_start_time,
                readers: Vec::new(),
                sink: None,
                values: Vec::new(),
            };

            if event_type.has_start_time {
                plan.fields.push(implicit(fields::START_TIME, "Start Time", ValueKind::Timestamp));
            }
            plan.fields.push(implicit(fields::END_TIME, "End Time", ValueKind::Timestamp));
            if event_type.has_thread {
                add_implicit_constant(&mut plan, metadata, fields::EVENT_THREAD, "Event Thread", content_type::THREAD)?;
            }
            if event_type.has_stack_trace {
                add_implicit_constant(&mut plan, metadata, fields::STACK_TRACE, "Stack Trace", content_type::STACK_TRACE)?;
            }
            for descriptor in &event_type.fields {
                add_field(&mut plan, metadata, descriptor, None)?;
            }

            plans.insert(event_type.id, plan);
        }

        // Data loss marker; only decodable when the chunk declares threads
        if metadata.content_type(content_type::THREAD).is_some() {
            let mut plan = EventPlan {
                identifier: BUFFER_LOST_TYPE.to_string(),
                label: "Buffer Lost".to_string(),
                description: "Event data dropped by the writer".to_string(),
                category: vec!["flightrec".to_string()],
                producer_uri: String::new(),
                fields: vec![implicit(fields::END_TIME, "End Time", ValueKind::Timestamp)],
                has_start_time: false,
                readers: Vec::new(),
                sink: None,
                values: Vec::new(),
            };
            add_implicit_constant(&mut plan, metadata, fields::EVENT_THREAD, "Event Thread", content_type::THREAD)?;
            let lost = ValueDescriptor::new(fields::DATA_LOST, DataType::U8)
                .with_label("Data Lost")
                .with_content_type(content_type::MEMORY);
            add_field(&mut plan, metadata, &lost, None)?;
            plans.insert(EVENT_BUFFER_LOST, plan);
        }

        Ok(Self {
            plans,
            tick_reader,
            options,
            skipped: 0,
            warned: HashSet::new(),
        })
    }

    /// Number of records skipped because their type was unknown
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn knows(&self, type_id: u64) -> bool {
        self.plans.contains_key(&type_id)
    }

    /// Decode one event whose type id has already been read from `offset`.
    ///
    /// Returns `false` when the record was skipped.
    pub fn dispatch(
        &mut self,
        offset: &mut Offset<'_>,
        type_id: u64,
        constants: &ConstantPools,
        metadata: &ChunkMetadata,
        factory: &mut dyn EventSinkFactory,
    ) -> Result<bool> {
        let Some(plan) = self.plans.get_mut(&type_id) else {
            if !self.options.skip_unknown_event_types {
                return Err(RecordingError::format(format!(
                    "record at offset {} has undeclared event type {}",
                    offset.start(),
                    type_id
                )));
            }
            if self.warned.insert(type_id) {
                warn!("Skipping records of undeclared event type {}", type_id);
            }
            offset.skip_to_end();
            self.skipped += 1;
            return Ok(false);
        };

        let basis = metadata.time_basis();
        let times = ReadContext {
            basis,
            constants: None,
            at: 0,
        };
        let end = self.tick_reader.read(offset, &times)?;
        let start = if plan.has_start_time {
            Some(self.tick_reader.read(offset, &times)?)
        } else {
            None
        };

        let ctx = ReadContext {
            basis,
            constants: Some(constants),
            at: end.as_i64().unwrap_or(i64::MIN),
        };

        let mut values = std::mem::take(&mut plan.values);
        values.clear();
        values.extend(start);
        values.push(end);
        for reader in &plan.readers {
            values.push(reader.read(offset, &ctx)?);
        }

        plan.sink(factory).add_event(&values);
        plan.values = values;
        Ok(true)
    }
}

fn implicit(identifier: &str, label: &str, kind: ValueKind) -> ValueField {
    ValueField {
        identifier: identifier.to_string(),
        label: label.to_string(),
        description: String::new(),
        kind,
    }
}

fn add_implicit_constant(
    plan: &mut EventPlan,
    metadata: &ChunkMetadata,
    identifier: &str,
    label: &str,
    content: u64,
) -> Result<()> {
    let reader = ValueReader::scalar(DataType::U8, content, identifier, metadata)?;
    plan.fields.push(implicit(identifier, label, reader.kind()));
    plan.readers.push(reader);
    Ok(())
}

/// Append the reader(s) for one declared field, flattening nested structs
fn add_field(
    plan: &mut EventPlan,
    metadata: &ChunkMetadata,
    descriptor: &ValueDescriptor,
    parent: Option<(&str, &str)>,
) -> Result<()> {
    let (identifier, label) = match parent {
        Some((id, label)) => (
            format!("{}:{}", id, descriptor.identifier),
            format!("{} : {}", label, descriptor.label),
        ),
        None => (descriptor.identifier.clone(), descriptor.label.clone()),
    };

    if descriptor.data_type == DataType::Struct {
        for child in &descriptor.children {
            add_field(plan, metadata, child, Some((&identifier, &label)))?;
        }
        return Ok(());
    }

    let reader = ValueReader::for_descriptor(descriptor, metadata)?;
    plan.fields.push(ValueField {
        identifier,
        label,
        description: descriptor.description.clone(),
        kind: reader.kind(),
    });
    plan.readers.push(reader);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::varint;
    use crate::format::{
        write_record, ContentTypeDescriptor, EventTypeDescriptor, MetadataRecord, ProducerDescriptor,
    };
    use crate::parser::sink::EventCollector;
    use bytes::BytesMut;

    fn metadata(event_types: Vec<EventTypeDescriptor>) -> ChunkMetadata {
        let thread = ContentTypeDescriptor {
            id: content_type::THREAD,
            name: "flightrec.Thread".to_string(),
            label: "Thread".to_string(),
            description: String::new(),
            simple: false,
            fields: vec![ValueDescriptor::new("name", DataType::Utf8)],
        };
        ChunkMetadata::from_record(MetadataRecord {
            previous_checkpoint: 0,
            start_time_nanos: 0,
            end_time_nanos: 0,
            start_ticks: 0,
            ticks_per_second: 1_000_000_000,
            producers: vec![ProducerDescriptor {
                id: 1,
                name: "p".to_string(),
                description: String::new(),
                uri: "http://p/".to_string(),
                event_types,
                content_types: vec![thread],
                relations: vec![],
            }],
        })
        .unwrap()
    }

    fn event_type(has_start_time: bool, has_thread: bool, fields: Vec<ValueDescriptor>) -> EventTypeDescriptor {
        EventTypeDescriptor {
            id: 20,
            name: "test.Event".to_string(),
            label: "Event".to_string(),
            description: String::new(),
            path: "test/Event".to_string(),
            has_start_time,
            has_thread,
            has_stack_trace: false,
            requestable: false,
            fields,
        }
    }

    fn record(build: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut payload = BytesMut::new();
        build(&mut payload);
        let mut out = BytesMut::new();
        write_record(&mut out, &payload).unwrap();
        out.to_vec()
    }

    #[test]
    fn test_decoded_order_puts_start_time_first() {
        let meta = metadata(vec![event_type(true, true, vec![ValueDescriptor::new("count", DataType::S8)])]);
        let mut pools = ConstantPools::for_metadata(&meta);
        pools.set_load_done();
        let mut dispatcher = EventDispatcher::new(&meta, ParserOptions::default()).unwrap();
        let mut collector = EventCollector::new();

        let data = record(|b| {
            varint::encode_i64(b, 200); // end
            varint::encode_i64(b, 100); // start
            varint::encode_u64(b, 0); // thread
            varint::encode_i64(b, 42);
        });
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(dispatcher.dispatch(&mut offset, 20, &pools, &meta, &mut collector).unwrap());

        let collection = collector.into_collection();
        let events = collection.get("test.Event").unwrap();
        let names: Vec<_> = events.fields.iter().map(|f| f.identifier.as_str()).collect();
        assert_eq!(names, vec!["startTime", "endTime", "eventThread", "count"]);
        assert_eq!(events.events[0], vec![
            Value::Timestamp(100),
            Value::Timestamp(200),
            Value::Null,
            Value::Long(42),
        ]);
    }

    #[test]
    fn test_nested_struct_fields_are_flattened() {
        let nested = ValueDescriptor::new("pos", DataType::Struct)
            .with_label("Position")
            .with_children(vec![
                ValueDescriptor::new("x", DataType::S4).with_label("X"),
                ValueDescriptor::new("inner", DataType::Struct)
                    .with_label("Inner")
                    .with_children(vec![ValueDescriptor::new("z", DataType::S4).with_label("Z")]),
            ]);
        let meta = metadata(vec![event_type(false, false, vec![nested])]);
        let pools = ConstantPools::for_metadata(&meta);
        let mut dispatcher = EventDispatcher::new(&meta, ParserOptions::default()).unwrap();
        let mut collector = EventCollector::new();

        let data = record(|b| {
            varint::encode_i64(b, 1);
            varint::encode_i64(b, 5);
            varint::encode_i64(b, 6);
        });
        let mut offset = Offset::new(&data, 0).unwrap();
        dispatcher.dispatch(&mut offset, 20, &pools, &meta, &mut collector).unwrap();

        let collection = collector.into_collection();
        let events = collection.get("test.Event").unwrap();
        let names: Vec<_> = events.fields.iter().map(|f| f.identifier.as_str()).collect();
        assert_eq!(names, vec!["endTime", "pos:x", "pos:inner:z"]);
        assert_eq!(events.fields[2].label, "Position : Inner : Z");
        assert_eq!(events.value(0, "pos:inner:z"), Some(&Value::Long(6)));
    }

    #[test]
    fn test_unknown_event_type_is_fatal_by_default() {
        let meta = metadata(vec![]);
        let pools = ConstantPools::for_metadata(&meta);
        let mut dispatcher = EventDispatcher::new(&meta, ParserOptions::default()).unwrap();
        let mut collector = EventCollector::new();

        let data = record(|b| varint::encode_i64(b, 1));
        let mut offset = Offset::new(&data, 0).unwrap();
        let err = dispatcher
            .dispatch(&mut offset, 99, &pools, &meta, &mut collector)
            .unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_unknown_event_type_skipped_when_lenient() {
        let meta = metadata(vec![]);
        let pools = ConstantPools::for_metadata(&meta);
        let options = ParserOptions {
            skip_unknown_event_types: true,
            ..ParserOptions::default()
        };
        let mut dispatcher = EventDispatcher::new(&meta, options).unwrap();
        let mut collector = EventCollector::new();

        let data = record(|b| varint::encode_i64(b, 1));
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(!dispatcher.dispatch(&mut offset, 99, &pools, &meta, &mut collector).unwrap());
        assert_eq!(offset.remaining(), 0);
        assert_eq!(dispatcher.skipped(), 1);
        assert!(collector.collection().is_empty());
    }

    #[test]
    fn test_thread_field_requires_descriptor() {
        let record = MetadataRecord {
            previous_checkpoint: 0,
            start_time_nanos: 0,
            end_time_nanos: 0,
            start_ticks: 0,
            ticks_per_second: 1,
            producers: vec![ProducerDescriptor {
                id: 1,
                name: "p".to_string(),
                description: String::new(),
                uri: String::new(),
                event_types: vec![event_type(false, true, vec![])],
                content_types: vec![],
                relations: vec![],
            }],
        };
        let meta = ChunkMetadata::from_record(record).unwrap();
        assert!(EventDispatcher::new(&meta, ParserOptions::default()).is_err());
    }

    #[test]
    fn test_buffer_lost_is_builtin() {
        let meta = metadata(vec![]);
        let dispatcher = EventDispatcher::new(&meta, ParserOptions::default()).unwrap();
        assert!(dispatcher.knows(EVENT_BUFFER_LOST));
    }
}
