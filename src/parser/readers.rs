// src/parser/readers.rs
//! Field decoders
//!
//! A value descriptor's (data type, content type) pair is mapped to a
//! [`ValueReader`] once, when the decode plan is built. Decoding a record
//! then only walks the prepared readers.

use crate::codec::Offset;
use crate::format::{content_type, ContentTypeDescriptor, DataType, ValueDescriptor};
use crate::parser::constants::ConstantPools;
use crate::parser::metadata::{ChunkMetadata, TimeBasis};
use crate::parser::value::{StructValue, Value};
use crate::utils::errors::{RecordingError, Result};
use serde::Serialize;
use std::sync::Arc;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Unit attached to a numeric field by its content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuantityUnit {
    Memory,
    Address,
    Percentage,
    EpochMillis,
    EpochNanos,
    Millis,
    Nanos,
    Ticks,
    TickSpan,
}

impl QuantityUnit {
    fn from_content_type(id: u64) -> Option<Self> {
        Some(match id {
            content_type::MEMORY => QuantityUnit::Memory,
            content_type::ADDRESS => QuantityUnit::Address,
            content_type::PERCENTAGE => QuantityUnit::Percentage,
            content_type::EPOCH_MILLIS => QuantityUnit::EpochMillis,
            content_type::EPOCH_NANOS => QuantityUnit::EpochNanos,
            content_type::MILLIS => QuantityUnit::Millis,
            content_type::NANOS => QuantityUnit::Nanos,
            content_type::TICKS => QuantityUnit::Ticks,
            content_type::TICKSPAN => QuantityUnit::TickSpan,
            _ => return None,
        })
    }
}

/// Shape of the values a reader produces, reported to sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValueKind {
    Boolean,
    Integer,
    Unsigned,
    Float,
    Char,
    Text,
    Timestamp,
    Duration,
    Memory,
    Address,
    Percentage,
    /// Resolved constant of the named content type
    Constant(Arc<str>),
    Array(Box<ValueKind>),
    Struct(Arc<str>),
}

/// State shared by all readers while decoding one record
#[derive(Clone, Copy)]
pub struct ReadContext<'c> {
    pub basis: TimeBasis,
    /// When absent, pool references are kept as [`Value::Reference`]
    pub constants: Option<&'c ConstantPools>,
    /// Timestamp used for constant lookups
    pub at: i64,
}

/// Decoder for one value
#[derive(Debug, Clone)]
pub enum ValueReader {
    Primitive(DataType),
    Quantity { data: DataType, unit: QuantityUnit },
    Constant { data: DataType, content_type: u64, name: Arc<str> },
    Array(Box<ValueReader>),
    Struct(Arc<StructReader>),
}

/// Decoder for an ordered list of named fields
#[derive(Debug, Clone)]
pub struct StructReader {
    type_name: Arc<str>,
    fields: Vec<(Arc<str>, ValueReader)>,
    simple: bool,
}

impl StructReader {
    /// Reader for entries of a constant pool
    pub fn for_content_type(descriptor: &ContentTypeDescriptor, metadata: &ChunkMetadata) -> Result<Self> {
        Ok(Self {
            type_name: Arc::from(descriptor.name.as_str()),
            fields: Self::field_readers(&descriptor.fields, metadata)?,
            simple: descriptor.simple,
        })
    }

    fn for_struct(descriptor: &ValueDescriptor, metadata: &ChunkMetadata) -> Result<Self> {
        Ok(Self {
            type_name: Arc::from(descriptor.identifier.as_str()),
            fields: Self::field_readers(&descriptor.children, metadata)?,
            simple: false,
        })
    }

    fn field_readers(
        fields: &[ValueDescriptor],
        metadata: &ChunkMetadata,
    ) -> Result<Vec<(Arc<str>, ValueReader)>> {
        fields
            .iter()
            .map(|f| -> Result<(Arc<str>, ValueReader)> {
                Ok((Arc::from(f.identifier.as_str()), ValueReader::for_descriptor(f, metadata)?))
            })
            .collect()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn read(&self, offset: &mut Offset<'_>, ctx: &ReadContext<'_>) -> Result<Value> {
        if self.simple {
            if let Some((_, reader)) = self.fields.first() {
                return reader.read(offset, ctx);
            }
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, reader) in &self.fields {
            fields.push((Arc::clone(name), reader.read(offset, ctx)?));
        }
        Ok(Value::Struct(Arc::new(StructValue {
            type_name: Arc::clone(&self.type_name),
            fields,
        })))
    }
}

impl ValueReader {
    /// Choose the decoder for a field descriptor
    pub fn for_descriptor(descriptor: &ValueDescriptor, metadata: &ChunkMetadata) -> Result<Self> {
        match descriptor.data_type {
            DataType::Struct => Ok(ValueReader::Struct(Arc::new(StructReader::for_struct(
                descriptor, metadata,
            )?))),
            DataType::StructArray => Ok(ValueReader::Array(Box::new(ValueReader::Struct(
                Arc::new(StructReader::for_struct(descriptor, metadata)?),
            )))),
            DataType::Array => {
                let element = descriptor.element_type.ok_or_else(|| {
                    RecordingError::format(format!(
                        "array field '{}' has no element type",
                        descriptor.identifier
                    ))
                })?;
                Ok(ValueReader::Array(Box::new(Self::scalar(
                    element,
                    descriptor.content_type,
                    &descriptor.identifier,
                    metadata,
                )?)))
            }
            data => Self::scalar(data, descriptor.content_type, &descriptor.identifier, metadata),
        }
    }

    /// Reader for a single scalar with the given content type
    pub fn scalar(
        data: DataType,
        content: u64,
        identifier: &str,
        metadata: &ChunkMetadata,
    ) -> Result<Self> {
        if content_type::is_pool(content) {
            if !data.is_integer() {
                return Err(RecordingError::format(format!(
                    "constant reference '{}' must be an integer, found {:?}",
                    identifier, data
                )));
            }
            let descriptor = metadata.content_type(content).ok_or_else(|| {
                RecordingError::format(format!(
                    "field '{}' references content type {} which has no descriptor",
                    identifier, content
                ))
            })?;
            return Ok(ValueReader::Constant {
                data,
                content_type: content,
                name: Arc::from(descriptor.name.as_str()),
            });
        }

        match QuantityUnit::from_content_type(content) {
            Some(unit) if data.is_numeric() => Ok(ValueReader::Quantity { data, unit }),
            Some(unit) => Err(RecordingError::format(format!(
                "field '{}' has unit {:?} but non-numeric data type {:?}",
                identifier, unit, data
            ))),
            // Unassigned content types are read as raw values
            None => Ok(ValueReader::Primitive(data)),
        }
    }

    pub fn read(&self, offset: &mut Offset<'_>, ctx: &ReadContext<'_>) -> Result<Value> {
        match self {
            ValueReader::Primitive(data) => read_primitive(*data, offset),
            ValueReader::Quantity { data, unit } => {
                let raw = read_primitive(*data, offset)?;
                Ok(apply_unit(raw, *unit, &ctx.basis))
            }
            ValueReader::Constant {
                data, content_type, ..
            } => {
                let id = read_integer(*data, offset)?;
                Ok(match ctx.constants {
                    Some(pools) => pools.resolve(*content_type, id, ctx.at),
                    None if id == 0 => Value::Null,
                    None => Value::Reference {
                        content_type: *content_type,
                        id,
                    },
                })
            }
            ValueReader::Array(element) => {
                let count = offset.read_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(element.read(offset, ctx)?);
                }
                Ok(Value::Array(Arc::from(items)))
            }
            ValueReader::Struct(reader) => reader.read(offset, ctx),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            ValueReader::Primitive(data) => match data {
                DataType::Boolean => ValueKind::Boolean,
                DataType::Float | DataType::Double => ValueKind::Float,
                DataType::Char => ValueKind::Char,
                DataType::Utf8 => ValueKind::Text,
                d if d.is_signed() => ValueKind::Integer,
                _ => ValueKind::Unsigned,
            },
            ValueReader::Quantity { unit, .. } => match unit {
                QuantityUnit::Memory => ValueKind::Memory,
                QuantityUnit::Address => ValueKind::Address,
                QuantityUnit::Percentage => ValueKind::Percentage,
                QuantityUnit::EpochMillis | QuantityUnit::EpochNanos | QuantityUnit::Ticks => {
                    ValueKind::Timestamp
                }
                QuantityUnit::Millis | QuantityUnit::Nanos | QuantityUnit::TickSpan => {
                    ValueKind::Duration
                }
            },
            ValueReader::Constant { name, .. } => ValueKind::Constant(Arc::clone(name)),
            ValueReader::Array(element) => ValueKind::Array(Box::new(element.kind())),
            ValueReader::Struct(reader) => ValueKind::Struct(Arc::clone(&reader.type_name)),
        }
    }
}

fn read_integer(data: DataType, offset: &mut Offset<'_>) -> Result<u64> {
    match read_primitive(data, offset)? {
        Value::Long(v) => Ok(v as u64),
        Value::Unsigned(v) => Ok(v),
        other => Err(RecordingError::format(format!(
            "expected an integer, decoded {:?}",
            other
        ))),
    }
}

fn read_primitive(data: DataType, offset: &mut Offset<'_>) -> Result<Value> {
    Ok(match data {
        DataType::Boolean => Value::Boolean(offset.read_bool()?),
        DataType::U1 => Value::Unsigned(offset.read_u8()? as u64),
        DataType::S1 => Value::Long(offset.read_i8()? as i64),
        DataType::U2 => Value::Unsigned(offset.read_u64()? & 0xFFFF),
        DataType::U4 => Value::Unsigned(offset.read_u64()? & 0xFFFF_FFFF),
        DataType::U8 => Value::Unsigned(offset.read_u64()?),
        DataType::S2 => Value::Long(offset.read_i64()? as i16 as i64),
        DataType::S4 => Value::Long(offset.read_i64()? as i32 as i64),
        DataType::S8 => Value::Long(offset.read_i64()?),
        DataType::Float => Value::Float(offset.read_f32()?),
        DataType::Double => Value::Double(offset.read_f64()?),
        DataType::Char => {
            let at = offset.position();
            let code = offset.read_u64()?;
            let ch = u32::try_from(code).ok().and_then(char::from_u32).ok_or_else(|| {
                RecordingError::format(format!("invalid char {:#x} at offset {}", code, at))
            })?;
            Value::Char(ch)
        }
        DataType::Utf8 => Value::Text(Arc::from(offset.read_text()?)),
        DataType::Array | DataType::Struct | DataType::StructArray => {
            return Err(RecordingError::format(format!(
                "{:?} is not a primitive data type",
                data
            )))
        }
    })
}

fn apply_unit(raw: Value, unit: QuantityUnit, basis: &TimeBasis) -> Value {
    let as_i64 = |v: &Value| match *v {
        Value::Float(f) => f as i64,
        Value::Double(d) => d as i64,
        Value::Unsigned(u) => u as i64,
        Value::Long(l) => l,
        _ => 0,
    };

    match unit {
        QuantityUnit::Memory => Value::Memory(as_i64(&raw) as u64),
        QuantityUnit::Address => Value::Address(as_i64(&raw) as u64),
        QuantityUnit::Percentage => Value::Percentage(raw.as_f64().unwrap_or_default()),
        QuantityUnit::EpochMillis => Value::Timestamp(as_i64(&raw).saturating_mul(NANOS_PER_MILLI)),
        QuantityUnit::EpochNanos => Value::Timestamp(as_i64(&raw)),
        QuantityUnit::Millis => Value::Duration(as_i64(&raw).saturating_mul(NANOS_PER_MILLI)),
        QuantityUnit::Nanos => Value::Duration(as_i64(&raw)),
        QuantityUnit::Ticks => Value::Timestamp(basis.ticks_to_nanos(as_i64(&raw))),
        QuantityUnit::TickSpan => Value::Duration(basis.tick_span_to_nanos(as_i64(&raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::varint;
    use crate::format::{write_record, MetadataRecord, ProducerDescriptor};
    use bytes::{BufMut, BytesMut};

    const BASIS: TimeBasis = TimeBasis {
        start_time_nanos: 1_000_000_000,
        start_ticks: 1_000,
        ticks_per_second: 1_000,
    };

    fn metadata(content_types: Vec<ContentTypeDescriptor>) -> ChunkMetadata {
        ChunkMetadata::from_record(MetadataRecord {
            previous_checkpoint: 0,
            start_time_nanos: BASIS.start_time_nanos,
            end_time_nanos: BASIS.start_time_nanos,
            start_ticks: BASIS.start_ticks,
            ticks_per_second: BASIS.ticks_per_second,
            producers: vec![ProducerDescriptor {
                id: 1,
                name: "p".to_string(),
                description: String::new(),
                uri: String::new(),
                event_types: vec![],
                content_types,
                relations: vec![],
            }],
        })
        .unwrap()
    }

    fn text_pool() -> ContentTypeDescriptor {
        ContentTypeDescriptor {
            id: 20,
            name: "text".to_string(),
            label: String::new(),
            description: String::new(),
            simple: true,
            fields: vec![ValueDescriptor::new("value", DataType::Utf8)],
        }
    }

    fn framed(payload: &BytesMut) -> Vec<u8> {
        let mut out = BytesMut::new();
        write_record(&mut out, payload).unwrap();
        out.to_vec()
    }

    fn ctx(constants: Option<&ConstantPools>) -> ReadContext<'_> {
        ReadContext {
            basis: BASIS,
            constants,
            at: 0,
        }
    }

    #[test]
    fn test_tick_timestamp_and_span() {
        let meta = metadata(vec![]);
        let stamp = ValueReader::scalar(DataType::S8, content_type::TICKS, "t", &meta).unwrap();
        let span = ValueReader::scalar(DataType::S8, content_type::TICKSPAN, "d", &meta).unwrap();
        assert_eq!(stamp.kind(), ValueKind::Timestamp);

        let mut payload = BytesMut::new();
        varint::encode_i64(&mut payload, 1_002);
        varint::encode_i64(&mut payload, 5);
        let data = framed(&payload);
        let mut offset = Offset::new(&data, 0).unwrap();

        assert_eq!(stamp.read(&mut offset, &ctx(None)).unwrap(), Value::Timestamp(1_002_000_000));
        assert_eq!(span.read(&mut offset, &ctx(None)).unwrap(), Value::Duration(5_000_000));
    }

    #[test]
    fn test_units_require_numbers() {
        let meta = metadata(vec![]);
        assert!(ValueReader::scalar(DataType::Utf8, content_type::MEMORY, "m", &meta).is_err());
        assert!(ValueReader::scalar(DataType::Float, content_type::PERCENTAGE, "p", &meta).is_ok());
    }

    #[test]
    fn test_constant_reference_requires_descriptor() {
        let meta = metadata(vec![text_pool()]);
        assert!(ValueReader::scalar(DataType::U8, 20, "name", &meta).is_ok());
        assert!(ValueReader::scalar(DataType::U8, 21, "name", &meta).is_err());
        assert!(ValueReader::scalar(DataType::Utf8, 20, "name", &meta).is_err());
    }

    #[test]
    fn test_constant_reference_resolution() {
        let meta = metadata(vec![text_pool()]);
        let reader = ValueReader::scalar(DataType::U8, 20, "name", &meta).unwrap();
        assert_eq!(reader.kind(), ValueKind::Constant(Arc::from("text")));

        let mut pools = ConstantPools::for_metadata(&meta);
        pools.put(20, 3, Value::text("resolved"), 0);

        let mut payload = BytesMut::new();
        varint::encode_u64(&mut payload, 3);
        varint::encode_u64(&mut payload, 3);
        varint::encode_u64(&mut payload, 0);
        let data = framed(&payload);
        let mut offset = Offset::new(&data, 0).unwrap();

        assert_eq!(reader.read(&mut offset, &ctx(Some(&pools))).unwrap(), Value::text("resolved"));
        assert_eq!(
            reader.read(&mut offset, &ctx(None)).unwrap(),
            Value::Reference { content_type: 20, id: 3 }
        );
        assert_eq!(reader.read(&mut offset, &ctx(None)).unwrap(), Value::Null);
    }

    #[test]
    fn test_struct_array() {
        let meta = metadata(vec![]);
        let descriptor = ValueDescriptor::new("points", DataType::StructArray).with_children(vec![
            ValueDescriptor::new("x", DataType::S4),
            ValueDescriptor::new("flag", DataType::Boolean),
        ]);
        let reader = ValueReader::for_descriptor(&descriptor, &meta).unwrap();

        let mut payload = BytesMut::new();
        varint::encode_u64(&mut payload, 2);
        varint::encode_i64(&mut payload, -7);
        payload.put_u8(1);
        varint::encode_i64(&mut payload, 9);
        payload.put_u8(0);
        let data = framed(&payload);
        let mut offset = Offset::new(&data, 0).unwrap();

        let value = reader.read(&mut offset, &ctx(None)).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].field("x"), Some(&Value::Long(-7)));
        assert_eq!(items[1].field("flag"), Some(&Value::Boolean(false)));
    }

    #[test]
    fn test_array_count_bounded_by_record() {
        let meta = metadata(vec![]);
        let reader = ValueReader::for_descriptor(&ValueDescriptor::array_of("a", DataType::S8), &meta).unwrap();
        let mut payload = BytesMut::new();
        varint::encode_u64(&mut payload, 1 << 40);
        let data = framed(&payload);
        let mut offset = Offset::new(&data, 0).unwrap();
        assert!(reader.read(&mut offset, &ctx(None)).unwrap_err().is_format_error());
    }

    #[test]
    fn test_narrow_integers() {
        let mut payload = BytesMut::new();
        varint::encode_i64(&mut payload, i16::MIN as i64);
        varint::encode_i64(&mut payload, -1);
        payload.put_u8(0xFF);
        varint::encode_u64(&mut payload, 'λ' as u64);
        let data = framed(&payload);
        let mut offset = Offset::new(&data, 0).unwrap();

        assert_eq!(read_primitive(DataType::S2, &mut offset).unwrap(), Value::Long(i16::MIN as i64));
        assert_eq!(read_primitive(DataType::U2, &mut offset).unwrap(), Value::Unsigned(0xFFFF));
        assert_eq!(read_primitive(DataType::S1, &mut offset).unwrap(), Value::Long(-1));
        assert_eq!(read_primitive(DataType::Char, &mut offset).unwrap(), Value::Char('λ'));
    }
}
