// src/format/model.rs
//! Descriptor model carried by the metadata record
//!
//! The writer builds these from its type registry and encodes them; the
//! reader decodes them back and derives its decode plans from them. Both
//! sides go through the same `encode`/`decode` pair.

use crate::codec::varint;
use crate::codec::Offset;
use crate::format::{EVENT_METADATA, MAX_DESCRIPTOR_DEPTH};
use crate::utils::errors::{RecordingError, Result};
use bytes::BufMut;
use serde::Serialize;

/// Physical encoding of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum DataType {
    Boolean = 1,
    U1 = 2,
    S1 = 3,
    U2 = 4,
    S2 = 5,
    U4 = 6,
    S4 = 7,
    U8 = 8,
    S8 = 9,
    Float = 10,
    Double = 11,
    Char = 12,
    Utf8 = 13,
    Array = 14,
    Struct = 15,
    StructArray = 16,
}

impl DataType {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            1 => DataType::Boolean,
            2 => DataType::U1,
            3 => DataType::S1,
            4 => DataType::U2,
            5 => DataType::S2,
            6 => DataType::U4,
            7 => DataType::S4,
            8 => DataType::U8,
            9 => DataType::S8,
            10 => DataType::Float,
            11 => DataType::Double,
            12 => DataType::Char,
            13 => DataType::Utf8,
            14 => DataType::Array,
            15 => DataType::Struct,
            16 => DataType::StructArray,
            other => {
                return Err(RecordingError::format(format!(
                    "unknown data type code {}",
                    other
                )))
            }
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Integer encodings, raw bytes included
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::U1
                | DataType::S1
                | DataType::U2
                | DataType::S2
                | DataType::U4
                | DataType::S4
                | DataType::U8
                | DataType::S8
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::S1 | DataType::S2 | DataType::S4 | DataType::S8
        )
    }

    /// Valid as the element type of a primitive `Array`
    pub fn is_primitive(self) -> bool {
        !matches!(
            self,
            DataType::Array | DataType::Struct | DataType::StructArray
        )
    }
}

/// One field of an event or content type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueDescriptor {
    pub identifier: String,
    pub label: String,
    pub description: String,
    pub data_type: DataType,
    pub content_type: u64,
    pub relation: u64,
    /// Element encoding for `Array`
    pub element_type: Option<DataType>,
    /// Nested fields for `Struct` and `StructArray`
    pub children: Vec<ValueDescriptor>,
}

impl ValueDescriptor {
    pub fn new(identifier: impl Into<String>, data_type: DataType) -> Self {
        let identifier = identifier.into();
        Self {
            label: identifier.clone(),
            identifier,
            description: String::new(),
            data_type,
            content_type: 0,
            relation: 0,
            element_type: None,
            children: Vec::new(),
        }
    }

    pub fn array_of(identifier: impl Into<String>, element: DataType) -> Self {
        let mut descriptor = Self::new(identifier, DataType::Array);
        descriptor.element_type = Some(element);
        descriptor
    }

    pub fn with_content_type(mut self, content_type: u64) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_relation(mut self, relation: u64) -> Self {
        self.relation = relation;
        self
    }

    pub fn with_children(mut self, children: Vec<ValueDescriptor>) -> Self {
        self.children = children;
        self
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode_text(buf, &self.identifier);
        varint::encode_text(buf, &self.label);
        varint::encode_text(buf, &self.description);
        buf.put_u8(self.data_type.code());
        varint::encode_u64(buf, self.content_type);
        varint::encode_u64(buf, self.relation);
        match self.data_type {
            DataType::Array => {
                let element = self.element_type.unwrap_or(DataType::U8);
                buf.put_u8(element.code());
            }
            DataType::Struct | DataType::StructArray => encode_list(buf, &self.children, Self::encode),
            _ => {}
        }
    }

    pub fn decode(offset: &mut Offset<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_DESCRIPTOR_DEPTH {
            return Err(RecordingError::format(format!(
                "value descriptors nested deeper than {}",
                MAX_DESCRIPTOR_DEPTH
            )));
        }

        let identifier = offset.read_text()?.to_string();
        let label = offset.read_text()?.to_string();
        let description = offset.read_text()?.to_string();
        let data_type = DataType::from_code(offset.read_u8()?)?;
        let content_type = offset.read_u64()?;
        let relation = offset.read_u64()?;

        let mut element_type = None;
        let mut children = Vec::new();
        match data_type {
            DataType::Array => {
                let element = DataType::from_code(offset.read_u8()?)?;
                if !element.is_primitive() {
                    return Err(RecordingError::format(format!(
                        "array field '{}' has non-primitive element type {:?}",
                        identifier, element
                    )));
                }
                element_type = Some(element);
            }
            DataType::Struct | DataType::StructArray => {
                children = decode_list(offset, |o| Self::decode(o, depth + 1))?;
            }
            _ => {}
        }

        Ok(Self {
            identifier,
            label,
            description,
            data_type,
            content_type,
            relation,
            element_type,
            children,
        })
    }
}

/// Schema of one event type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTypeDescriptor {
    pub id: u64,
    pub name: String,
    pub label: String,
    pub description: String,
    /// Slash separated category path ending in the type's own segment
    pub path: String,
    pub has_start_time: bool,
    pub has_thread: bool,
    pub has_stack_trace: bool,
    pub requestable: bool,
    /// User fields only; implicit fields are implied by the flags
    pub fields: Vec<ValueDescriptor>,
}

const FLAG_START_TIME: u8 = 0x01;
const FLAG_THREAD: u8 = 0x02;
const FLAG_STACK_TRACE: u8 = 0x04;
const FLAG_REQUESTABLE: u8 = 0x08;

impl EventTypeDescriptor {
    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode_u64(buf, self.id);
        varint::encode_text(buf, &self.name);
        varint::encode_text(buf, &self.label);
        varint::encode_text(buf, &self.description);
        varint::encode_text(buf, &self.path);

        let mut flags = 0u8;
        if self.has_start_time {
            flags |= FLAG_START_TIME;
        }
        if self.has_thread {
            flags |= FLAG_THREAD;
        }
        if self.has_stack_trace {
            flags |= FLAG_STACK_TRACE;
        }
        if self.requestable {
            flags |= FLAG_REQUESTABLE;
        }
        buf.put_u8(flags);

        encode_list(buf, &self.fields, ValueDescriptor::encode);
    }

    pub fn decode(offset: &mut Offset<'_>) -> Result<Self> {
        let id = offset.read_u64()?;
        let name = offset.read_text()?.to_string();
        let label = offset.read_text()?.to_string();
        let description = offset.read_text()?.to_string();
        let path = offset.read_text()?.to_string();
        let flags = offset.read_u8()?;
        let fields = decode_list(offset, |o| ValueDescriptor::decode(o, 0))?;

        Ok(Self {
            id,
            name,
            label,
            description,
            path,
            has_start_time: flags & FLAG_START_TIME != 0,
            has_thread: flags & FLAG_THREAD != 0,
            has_stack_trace: flags & FLAG_STACK_TRACE != 0,
            requestable: flags & FLAG_REQUESTABLE != 0,
            fields,
        })
    }

    /// Category segments, i.e. the path without its last segment
    pub fn category(&self) -> Vec<String> {
        let mut segments: Vec<String> = self
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        segments.pop();
        segments
    }
}

/// Schema of the values stored in one constant pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentTypeDescriptor {
    pub id: u64,
    pub name: String,
    pub label: String,
    pub description: String,
    /// Entries are encoded as their single field, without a struct wrapper
    pub simple: bool,
    pub fields: Vec<ValueDescriptor>,
}

impl ContentTypeDescriptor {
    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode_u64(buf, self.id);
        varint::encode_text(buf, &self.name);
        varint::encode_text(buf, &self.label);
        varint::encode_text(buf, &self.description);
        varint::encode_bool(buf, self.simple);
        encode_list(buf, &self.fields, ValueDescriptor::encode);
    }

    pub fn decode(offset: &mut Offset<'_>) -> Result<Self> {
        let id = offset.read_u64()?;
        let name = offset.read_text()?.to_string();
        let label = offset.read_text()?.to_string();
        let description = offset.read_text()?.to_string();
        let simple = offset.read_bool()?;
        let fields = decode_list(offset, |o| ValueDescriptor::decode(o, 0))?;

        if simple && fields.len() != 1 {
            return Err(RecordingError::format(format!(
                "simple content type '{}' declares {} fields",
                name,
                fields.len()
            )));
        }

        Ok(Self {
            id,
            name,
            label,
            description,
            simple,
            fields,
        })
    }
}

/// Named relation between fields, e.g. a shared key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relation {
    pub id: u64,
    pub name: String,
}

impl Relation {
    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode_u64(buf, self.id);
        varint::encode_text(buf, &self.name);
    }

    pub fn decode(offset: &mut Offset<'_>) -> Result<Self> {
        Ok(Self {
            id: offset.read_u64()?,
            name: offset.read_text()?.to_string(),
        })
    }
}

/// A producer and the types it declares
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerDescriptor {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub uri: String,
    pub event_types: Vec<EventTypeDescriptor>,
    pub content_types: Vec<ContentTypeDescriptor>,
    pub relations: Vec<Relation>,
}

impl ProducerDescriptor {
    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode_u64(buf, self.id);
        varint::encode_text(buf, &self.name);
        varint::encode_text(buf, &self.description);
        varint::encode_text(buf, &self.uri);
        encode_list(buf, &self.event_types, EventTypeDescriptor::encode);
        encode_list(buf, &self.content_types, ContentTypeDescriptor::encode);
        encode_list(buf, &self.relations, Relation::encode);
    }

    pub fn decode(offset: &mut Offset<'_>) -> Result<Self> {
        Ok(Self {
            id: offset.read_u64()?,
            name: offset.read_text()?.to_string(),
            description: offset.read_text()?.to_string(),
            uri: offset.read_text()?.to_string(),
            event_types: decode_list(offset, EventTypeDescriptor::decode)?,
            content_types: decode_list(offset, ContentTypeDescriptor::decode)?,
            relations: decode_list(offset, Relation::decode)?,
        })
    }
}

/// Payload of the metadata record (type id 0)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRecord {
    /// Chunk-relative offset of the newest checkpoint, 0 if none
    pub previous_checkpoint: u64,
    pub start_time_nanos: i64,
    pub end_time_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: u64,
    pub producers: Vec<ProducerDescriptor>,
}

impl MetadataRecord {
    /// Encode the full payload, record type id included
    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode_u64(buf, EVENT_METADATA);
        varint::encode_u64(buf, self.previous_checkpoint);
        varint::encode_i64(buf, self.start_time_nanos);
        varint::encode_i64(buf, self.end_time_nanos);
        varint::encode_i64(buf, self.start_ticks);
        varint::encode_u64(buf, self.ticks_per_second);
        encode_list(buf, &self.producers, ProducerDescriptor::encode);
    }

    /// Decode a payload whose type id has already been consumed
    pub fn decode(offset: &mut Offset<'_>) -> Result<Self> {
        Ok(Self {
            previous_checkpoint: offset.read_u64()?,
            start_time_nanos: offset.read_i64()?,
            end_time_nanos: offset.read_i64()?,
            start_ticks: offset.read_i64()?,
            ticks_per_second: offset.read_u64()?,
            producers: decode_list(offset, ProducerDescriptor::decode)?,
        })
    }
}

fn encode_list<B: BufMut, T>(buf: &mut B, items: &[T], encode: impl Fn(&T, &mut B)) {
    varint::encode_u64(buf, items.len() as u64);
    for item in items {
        encode(item, buf);
    }
}

fn decode_list<'a, T>(
    offset: &mut Offset<'a>,
    decode: impl Fn(&mut Offset<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    // Every entry takes at least one byte, so the count is bounded by the record
    let count = offset.read_len()?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(decode(offset)?);
    }
    Ok(items)
}
