// src/recording/metadata.rs
//! Metadata and checkpoint records for a finished chunk
//!
//! The metadata record describes every event type and every pool-backed
//! type of the registry. The checkpoint carries the pooled values.

use crate::codec::varint;
use crate::format::{
    self, ContentTypeDescriptor, DataType, EventTypeDescriptor, MetadataRecord, ProducerDescriptor,
    ValueDescriptor, EVENT_CHECKPOINT, MAX_DESCRIPTOR_DEPTH,
};
use crate::recording::constant_pool::ConstantPools;
use crate::recording::encoder::ValueEncoder;
use crate::recording::types::{Builtin, Type, TypeRegistry, TypedField};
use crate::utils::config::ProducerConfig;
use crate::utils::errors::{RecordingError, Result};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::debug;

/// Time range and clock of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTimes {
    pub start_time_nanos: i64,
    pub end_time_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: u64,
}

/// Describe the registry's event and pool types
pub fn build_metadata(
    registry: &TypeRegistry,
    producer: &ProducerConfig,
    times: ChunkTimes,
    previous_checkpoint: u64,
) -> Result<MetadataRecord> {
    let mut event_types = Vec::new();
    let mut content_types = Vec::new();

    for ty in registry.types() {
        if let Some(traits) = ty.event_traits() {
            event_types.push(EventTypeDescriptor {
                id: ty.id(),
                name: ty.name().to_string(),
                label: ty.label().to_string(),
                description: ty.description().to_string(),
                path: ty.path(),
                has_start_time: traits.start_time,
                has_thread: traits.thread,
                has_stack_trace: traits.stack_trace,
                requestable: false,
                fields: describe_fields(registry, ty.declared_fields(), 0)?,
            });
        } else if ty.has_constant_pool() {
            content_types.push(describe_pool(registry, &ty)?);
        }
    }

    debug!(
        "Metadata with {} event types and {} content types",
        event_types.len(),
        content_types.len()
    );

    Ok(MetadataRecord {
        previous_checkpoint,
        start_time_nanos: times.start_time_nanos,
        end_time_nanos: times.end_time_nanos,
        start_ticks: times.start_ticks,
        ticks_per_second: times.ticks_per_second,
        producers: vec![ProducerDescriptor {
            id: 0,
            name: producer.name.clone(),
            description: producer.description.clone(),
            uri: producer.uri.clone(),
            event_types,
            content_types,
            relations: Vec::new(),
        }],
    })
}

/// Length-prefixed metadata record
pub fn encode_metadata(record: &MetadataRecord) -> Result<BytesMut> {
    let mut payload = BytesMut::with_capacity(1024);
    record.encode(&mut payload);
    let mut out = BytesMut::with_capacity(payload.len() + 4);
    format::write_record(&mut out, &payload)?;
    Ok(out)
}

/// Length-prefixed checkpoint holding every non-empty pool
pub fn encode_checkpoint(
    registry: &TypeRegistry,
    pools: &ConstantPools,
    timestamp_ticks: i64,
    previous_checkpoint: u64,
) -> Result<BytesMut> {
    let encoder = ValueEncoder::new(registry, pools);
    let snapshot: Vec<_> = pools.snapshot().into_iter().filter(|p| !p.is_empty()).collect();

    let mut payload = BytesMut::with_capacity(1024);
    varint::encode_u64(&mut payload, EVENT_CHECKPOINT);
    varint::encode_u64(&mut payload, previous_checkpoint);
    varint::encode_i64(&mut payload, timestamp_ticks);
    varint::encode_u64(&mut payload, snapshot.len() as u64);

    for pool in &snapshot {
        let entries = pool.entries();
        varint::encode_u64(&mut payload, pool.content_type_id());
        varint::encode_u64(&mut payload, entries.len() as u64);
        for (index, value) in &entries {
            varint::encode_u64(&mut payload, *index);
            encoder.encode_pool_entry(&mut payload, pool.get_type(), value)?;
        }
    }

    debug!("Checkpoint with {} pools, {} bytes", snapshot.len(), payload.len());

    let mut out = BytesMut::with_capacity(payload.len() + 4);
    format::write_record(&mut out, &payload)?;
    Ok(out)
}

fn describe_pool(registry: &TypeRegistry, ty: &Arc<Type>) -> Result<ContentTypeDescriptor> {
    let fields = if ty.is_simple() {
        vec![ValueDescriptor::new("value", DataType::Utf8)]
    } else {
        describe_fields(registry, ty.fields(), 0)?
    };
    Ok(ContentTypeDescriptor {
        id: ty.content_type_id(),
        name: ty.name().to_string(),
        label: ty.label().to_string(),
        description: ty.description().to_string(),
        simple: ty.is_simple(),
        fields,
    })
}

fn describe_fields(registry: &TypeRegistry, fields: &[TypedField], depth: usize) -> Result<Vec<ValueDescriptor>> {
    fields
        .iter()
        .map(|field| describe_field(registry, field, depth))
        .collect()
}

fn describe_field(registry: &TypeRegistry, field: &TypedField, depth: usize) -> Result<ValueDescriptor> {
    let target = field.field_type(registry)?;

    let descriptor = match target.builtin() {
        Some(Builtin::Text) => scalar_or_array(field, DataType::U8).with_content_type(target.content_type_id()),
        Some(builtin) => scalar_or_array(field, builtin.data_type(field.is_unsigned()))
            .with_content_type(field.content_type()?),
        None if target.has_constant_pool() => {
            scalar_or_array(field, DataType::U8).with_content_type(target.content_type_id())
        }
        None => {
            if depth >= MAX_DESCRIPTOR_DEPTH {
                return Err(RecordingError::argument(format!(
                    "inline type '{}' contains itself through field '{}'",
                    target.name(),
                    field.name()
                )));
            }
            let data_type = if field.is_array() {
                DataType::StructArray
            } else {
                DataType::Struct
            };
            ValueDescriptor::new(field.name(), data_type)
                .with_children(describe_fields(registry, target.fields(), depth + 1)?)
        }
    };

    Ok(descriptor
        .with_label(field.label())
        .with_description(field.description()))
}

fn scalar_or_array(field: &TypedField, data_type: DataType) -> ValueDescriptor {
    if field.is_array() {
        ValueDescriptor::array_of(field.name(), data_type)
    } else {
        ValueDescriptor::new(field.name(), data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::offset::Offset;
    use crate::format::content_type;
    use crate::parser::metadata::ChunkMetadata;
    use crate::recording::types::names;
    use crate::recording::value::FieldValue;

    fn times() -> ChunkTimes {
        ChunkTimes {
            start_time_nanos: 1_700_000_000_000_000_000,
            end_time_nanos: 1_700_000_001_000_000_000,
            start_ticks: 0,
            ticks_per_second: 1_000_000_000,
        }
    }

    #[test]
    fn test_metadata_is_readable() {
        let registry = TypeRegistry::new().unwrap();
        registry
            .register_event_type("test.Event", |b| {
                b.add_field("customField", Builtin::Long)
                    .add_field("name", Builtin::Text);
            })
            .unwrap();

        let record = build_metadata(&registry, &ProducerConfig::default(), times(), 8).unwrap();
        let bytes = encode_metadata(&record).unwrap();

        let mut offset = Offset::new(&bytes, 0).unwrap();
        assert_eq!(offset.read_u64().unwrap(), format::EVENT_METADATA);
        let decoded = MetadataRecord::decode(&mut offset).unwrap();
        assert_eq!(decoded, record);

        let metadata = ChunkMetadata::from_record(decoded).unwrap();
        assert!(metadata.content_type(content_type::THREAD).is_some());
        assert!(metadata.content_type(content_type::STACK_TRACE).is_some());

        let (_, event) = metadata
            .event_types()
            .find(|(_, e)| e.name == "test.Event")
            .unwrap();
        assert!(event.has_start_time && event.has_thread && !event.has_stack_trace);
        let names: Vec<&str> = event.fields.iter().map(|f| f.identifier.as_str()).collect();
        assert_eq!(names, vec!["customField", "name"]);
        assert_eq!(event.fields[0].data_type, DataType::S8);
        assert_eq!(
            event.fields[1].content_type,
            registry.builtin(Builtin::Text).content_type_id()
        );
    }

    #[test]
    fn test_inline_struct_descriptor() {
        let registry = TypeRegistry::new().unwrap();
        let point = registry
            .register_inline_type("geo.Point", None, |b| {
                b.add_field("x", Builtin::Int).add_field("y", Builtin::Int);
            })
            .unwrap();
        registry
            .register_event_type("geo.Moved", |b| {
                b.add_field("to", &point).add_array_field("path", &point);
            })
            .unwrap();

        let record = build_metadata(&registry, &ProducerConfig::default(), times(), 0).unwrap();
        let event = record.producers[0]
            .event_types
            .iter()
            .find(|e| e.name == "geo.Moved")
            .unwrap();
        assert_eq!(event.fields[0].data_type, DataType::Struct);
        assert_eq!(event.fields[0].children.len(), 2);
        assert_eq!(event.fields[1].data_type, DataType::StructArray);
        // inline types have no pool
        assert!(record.producers[0]
            .content_types
            .iter()
            .all(|c| c.name != "geo.Point"));
    }

    #[test]
    fn test_self_inline_type_rejected() {
        let registry = TypeRegistry::new().unwrap();
        registry
            .register_inline_type("t.Loop", None, |b| {
                b.add_field("next", b.self_type());
            })
            .unwrap();
        registry
            .register_event_type("t.UsesLoop", |b| {
                b.add_field("loop", "t.Loop");
            })
            .unwrap();
        let err = build_metadata(&registry, &ProducerConfig::default(), times(), 0).unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_unresolved_forward_reference_fails() {
        let registry = TypeRegistry::new().unwrap();
        registry
            .register_event_type("t.Forward", |b| {
                b.add_field("later", "t.NeverRegistered");
            })
            .unwrap();
        assert!(build_metadata(&registry, &ProducerConfig::default(), times(), 0).is_err());
    }

    #[test]
    fn test_checkpoint_layout() {
        let registry = TypeRegistry::new().unwrap();
        let pools = ConstantPools::new();
        let text = registry.builtin(Builtin::Text);
        pools.intern(&registry, text, &FieldValue::from("hello")).unwrap();

        let bytes = encode_checkpoint(&registry, &pools, 99, 0).unwrap();
        let mut offset = Offset::new(&bytes, 0).unwrap();
        assert_eq!(offset.read_u64().unwrap(), EVENT_CHECKPOINT);
        assert_eq!(offset.read_u64().unwrap(), 0);
        assert_eq!(offset.read_i64().unwrap(), 99);
        assert_eq!(offset.read_u64().unwrap(), 1);
        assert_eq!(offset.read_u64().unwrap(), text.content_type_id());
        assert_eq!(offset.read_u64().unwrap(), 1);
        assert_eq!(offset.read_u64().unwrap(), 1);
        assert_eq!(offset.read_text().unwrap(), "hello");
        assert_eq!(offset.remaining(), 0);

        // empty pools are left out
        pools.pool(&registry.get(names::THREAD).unwrap()).unwrap();
        let again = encode_checkpoint(&registry, &pools, 99, 0).unwrap();
        assert_eq!(again, bytes);
    }
}
