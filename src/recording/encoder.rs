// src/recording/encoder.rs
//! Event record encoding
//!
//! Fields are written in declaration order, so the implicit event fields go
//! first: end time, start time, thread, stack trace. Unset fields are written
//! as their type's default so later fields never shift.

use crate::codec::varint;
use crate::format::{self, EVENT_BUFFER_LOST, MAX_DESCRIPTOR_DEPTH};
use crate::recording::constant_pool::ConstantPools;
use crate::recording::types::{Builtin, Type, TypeRegistry, TypedField};
use crate::recording::value::{FieldValue, TypedValue};
use crate::utils::errors::{RecordingError, Result};
use bytes::{BufMut, BytesMut};
use std::sync::Arc;

/// Encodes values against one registry and its constant pools
pub struct ValueEncoder<'a> {
    registry: &'a TypeRegistry,
    pools: &'a ConstantPools,
}

impl<'a> ValueEncoder<'a> {
    pub fn new(registry: &'a TypeRegistry, pools: &'a ConstantPools) -> Self {
        Self { registry, pools }
    }

    /// A complete, length-prefixed event record
    pub fn encode_event(&self, event: &TypedValue) -> Result<BytesMut> {
        let ty = event.get_type();
        if !ty.is_event() {
            return Err(RecordingError::argument(format!(
                "'{}' is not an event type",
                ty.name()
            )));
        }

        let mut payload = BytesMut::with_capacity(64);
        varint::encode_u64(&mut payload, ty.id());
        self.encode_fields(&mut payload, ty, Some(event), 0)?;
        frame(&payload)
    }

    /// One constant pool entry, without its index
    pub fn encode_pool_entry(&self, buf: &mut BytesMut, ty: &Arc<Type>, value: &FieldValue) -> Result<()> {
        match value {
            FieldValue::Text(text) if ty.is_simple() => {
                varint::encode_text(buf, text);
                Ok(())
            }
            FieldValue::Value(typed) if typed.type_id() == ty.id() => {
                self.encode_fields(buf, ty, Some(typed), 0)
            }
            other => Err(RecordingError::argument(format!(
                "pool of '{}' cannot hold a {} value",
                ty.name(),
                other.kind()
            ))),
        }
    }

    /// Every field of `ty`, taking values from `value` when present
    pub fn encode_fields(
        &self,
        buf: &mut BytesMut,
        ty: &Arc<Type>,
        value: Option<&TypedValue>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_DESCRIPTOR_DEPTH {
            return Err(RecordingError::argument(format!(
                "type '{}' nests inline values too deeply",
                ty.name()
            )));
        }
        for (index, field) in ty.fields().iter().enumerate() {
            let slot = value.and_then(|v| v.values().get(index)).and_then(Option::as_ref);
            self.encode_field(buf, field, slot, depth)?;
        }
        Ok(())
    }

    fn encode_field(
        &self,
        buf: &mut BytesMut,
        field: &TypedField,
        value: Option<&FieldValue>,
        depth: usize,
    ) -> Result<()> {
        let target = field.field_type(self.registry)?;
        if !field.is_array() {
            return self.encode_scalar(buf, field, &target, value, depth);
        }

        let items: &[FieldValue] = match value {
            Some(FieldValue::Array(items)) => items,
            None | Some(FieldValue::Null) => &[],
            Some(other) => return Err(mismatch(field, &target, other)),
        };
        varint::encode_u64(buf, items.len() as u64);
        for item in items {
            self.encode_scalar(buf, field, &target, Some(item), depth)?;
        }
        Ok(())
    }

    fn encode_scalar(
        &self,
        buf: &mut BytesMut,
        field: &TypedField,
        target: &Arc<Type>,
        value: Option<&FieldValue>,
        depth: usize,
    ) -> Result<()> {
        let value = value.filter(|v| !v.is_null());

        if target.has_constant_pool() {
            let index = match value {
                Some(v) => self.pools.intern(self.registry, target, v)?.index(),
                None => 0,
            };
            varint::encode_u64(buf, index);
            return Ok(());
        }

        if let Some(builtin) = target.builtin() {
            let default = builtin.default_value();
            return encode_builtin(buf, field, builtin, value.unwrap_or(&default));
        }

        let nested = match value {
            Some(FieldValue::Value(v)) if v.type_id() == target.id() => Some(v),
            None => None,
            Some(other) => return Err(mismatch(field, target, other)),
        };
        self.encode_fields(buf, target, nested, depth + 1)
    }
}

fn encode_builtin(buf: &mut BytesMut, field: &TypedField, builtin: Builtin, value: &FieldValue) -> Result<()> {
    let unsigned = field.is_unsigned();
    match (builtin, value) {
        (Builtin::Byte, FieldValue::Byte(v)) => buf.put_i8(*v),
        (Builtin::Char, FieldValue::Char(v)) => varint::encode_u64(buf, u64::from(*v)),
        (Builtin::Short, FieldValue::Short(v)) if unsigned => {
            varint::encode_u64(buf, u64::from(*v as u16))
        }
        (Builtin::Short, FieldValue::Short(v)) => varint::encode_i64(buf, i64::from(*v)),
        (Builtin::Int, FieldValue::Int(v)) if unsigned => varint::encode_u64(buf, u64::from(*v as u32)),
        (Builtin::Int, FieldValue::Int(v)) => varint::encode_i64(buf, i64::from(*v)),
        (Builtin::Long, FieldValue::Long(v)) => varint::encode_i64(buf, *v),
        (Builtin::Float, FieldValue::Float(v)) => varint::encode_f32(buf, *v),
        (Builtin::Double, FieldValue::Double(v)) => varint::encode_f64(buf, *v),
        (Builtin::Boolean, FieldValue::Boolean(v)) => varint::encode_bool(buf, *v),
        (builtin, other) => {
            return Err(RecordingError::argument(format!(
                "field '{}' of type '{}' cannot hold a {} value",
                field.name(),
                builtin.type_name(),
                other.kind()
            )))
        }
    }
    Ok(())
}

/// Data loss marker: end time, thread reference and the dropped byte count
pub fn encode_buffer_lost(end_ticks: i64, thread_index: u64, lost_bytes: u64) -> Result<BytesMut> {
    let mut payload = BytesMut::with_capacity(32);
    varint::encode_u64(&mut payload, EVENT_BUFFER_LOST);
    varint::encode_i64(&mut payload, end_ticks);
    varint::encode_u64(&mut payload, thread_index);
    varint::encode_u64(&mut payload, lost_bytes);
    frame(&payload)
}

fn frame(payload: &[u8]) -> Result<BytesMut> {
    let mut record = BytesMut::with_capacity(payload.len() + 4);
    format::write_record(&mut record, payload)?;
    Ok(record)
}

fn mismatch(field: &TypedField, target: &Type, value: &FieldValue) -> RecordingError {
    RecordingError::argument(format!(
        "field '{}' of type '{}' cannot hold a {} value",
        field.name(),
        target.name(),
        value.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::offset::{read_u32_at, Offset};
    use crate::recording::types::{names, EventTraits, TypeRef};

    fn setup() -> (TypeRegistry, ConstantPools) {
        (TypeRegistry::new().unwrap(), ConstantPools::new())
    }

    #[test]
    fn test_record_framing() {
        let (registry, pools) = setup();
        let event = registry
            .register_event_type_with(
                "t.Plain",
                EventTraits {
                    start_time: false,
                    thread: false,
                    stack_trace: false,
                },
                |b| {
                    b.add_field("value", Builtin::Long);
                },
            )
            .unwrap();
        let value = registry
            .value_of(&event, |b| {
                b.put("endTime", 100i64).put("value", -1i64);
            })
            .unwrap();

        let record = ValueEncoder::new(&registry, &pools).encode_event(&value).unwrap();
        let len = read_u32_at(&record, 0).unwrap() as usize;
        assert_eq!(len + 4, record.len());

        let mut offset = Offset::new(&record, 0).unwrap();
        assert_eq!(offset.read_u64().unwrap(), event.id());
        assert_eq!(offset.read_i64().unwrap(), 100);
        assert_eq!(offset.read_i64().unwrap(), -1);
        assert_eq!(offset.remaining(), 0);
    }

    #[test]
    fn test_unset_fields_use_defaults() {
        let (registry, pools) = setup();
        let ty = registry
            .register_type("t.Defaults", None, |b| {
                b.add_field("b", Builtin::Byte)
                    .add_field("s", Builtin::Short)
                    .add_field("flag", Builtin::Boolean)
                    .add_field("text", Builtin::Text)
                    .add_field("d", Builtin::Double)
                    .add_field("last", Builtin::Long);
            })
            .unwrap();
        let value = registry
            .value_of(&ty, |b| {
                b.put("last", 42i64);
            })
            .unwrap();

        let mut buf = BytesMut::new();
        ValueEncoder::new(&registry, &pools)
            .encode_fields(&mut buf, &ty, Some(&value), 0)
            .unwrap();

        let mut expected = BytesMut::new();
        expected.put_i8(0);
        varint::encode_i64(&mut expected, 0);
        varint::encode_bool(&mut expected, false);
        varint::encode_u64(&mut expected, 0);
        varint::encode_f64(&mut expected, 0.0);
        varint::encode_i64(&mut expected, 42);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_text_goes_through_pool() {
        let (registry, pools) = setup();
        let ty = registry
            .register_type("t.Named", None, |b| {
                b.add_field("a", Builtin::Text).add_field("b", Builtin::Text);
            })
            .unwrap();
        let value = registry
            .value_of(&ty, |b| {
                b.put("a", "same").put("b", "same");
            })
            .unwrap();

        let mut buf = BytesMut::new();
        ValueEncoder::new(&registry, &pools)
            .encode_fields(&mut buf, &ty, Some(&value), 0)
            .unwrap();
        assert_eq!(&buf[..], &[1, 1]);
        assert_eq!(pools.pool(registry.builtin(Builtin::Text)).unwrap().len(), 1);
    }

    #[test]
    fn test_unsigned_zero_extends() {
        let (registry, pools) = setup();
        let ty = registry
            .register_type("t.Unsigned", None, |b| {
                b.add_field_with("u", Builtin::Short, |f| {
                    f.add_annotation(names::UNSIGNED, None);
                })
                .add_field("s", Builtin::Short);
            })
            .unwrap();
        let value = registry
            .value_of(&ty, |b| {
                b.put("u", -1i16).put("s", -1i16);
            })
            .unwrap();

        let mut buf = BytesMut::new();
        ValueEncoder::new(&registry, &pools)
            .encode_fields(&mut buf, &ty, Some(&value), 0)
            .unwrap();

        let (unsigned, used) = varint::decode_u64(&buf, 0, buf.len()).unwrap();
        assert_eq!(unsigned, 0xFFFF);
        let (signed, _) = varint::decode_u64(&buf, used, buf.len()).unwrap();
        assert_eq!(signed as i64, -1);
    }

    #[test]
    fn test_inline_struct_written_in_place() {
        let (registry, pools) = setup();
        let point = registry
            .register_inline_type("geo.Point", None, |b| {
                b.add_field("x", Builtin::Int).add_field("y", Builtin::Int);
            })
            .unwrap();
        let shape = registry
            .register_type("geo.Shape", None, |b| {
                b.add_field("origin", &point).add_array_field("corners", &point);
            })
            .unwrap();
        let origin = registry
            .value_of(&point, |b| {
                b.put("x", 1).put("y", 2);
            })
            .unwrap();
        let value = registry
            .value_of(&shape, |b| {
                b.put("corners", vec![origin.clone()]).put("origin", origin);
            })
            .unwrap();

        let mut buf = BytesMut::new();
        ValueEncoder::new(&registry, &pools)
            .encode_fields(&mut buf, &shape, Some(&value), 0)
            .unwrap();
        assert_eq!(&buf[..], &[1, 2, 1, 1, 2]);
    }

    #[test]
    fn test_self_inline_cycle_rejected() {
        let (registry, pools) = setup();
        let node = registry
            .register_inline_type("t.Node", None, |b| {
                b.add_field("next", TypeRef::SelfType);
            })
            .unwrap();
        let value = registry.value_of(&node, |_| {}).unwrap();
        let mut buf = BytesMut::new();
        assert!(ValueEncoder::new(&registry, &pools)
            .encode_fields(&mut buf, &node, Some(&value), 0)
            .is_err());
    }

    #[test]
    fn test_stack_trace_pool_entry() {
        let (registry, pools) = setup();
        let trace = registry.get(names::STACK_TRACE).unwrap();
        let frame = registry.get(names::STACK_FRAME).unwrap();
        let frame_value = registry
            .value_of(&frame, |b| {
                b.put("function", "main").put("line", 10);
            })
            .unwrap();
        let trace_value = registry
            .value_of(&trace, |b| {
                b.put("frames", vec![frame_value.clone(), frame_value]);
            })
            .unwrap();

        let mut buf = BytesMut::new();
        let encoder = ValueEncoder::new(&registry, &pools);
        encoder
            .encode_pool_entry(&mut buf, &trace, &FieldValue::from(trace_value))
            .unwrap();

        // truncated=false, 2 frames, both the same pooled frame
        assert_eq!(&buf[..], &[0, 2, 1, 1]);
        assert!(encoder
            .encode_pool_entry(&mut buf, &trace, &FieldValue::Long(1))
            .is_err());
    }

    #[test]
    fn test_non_event_rejected() {
        let (registry, pools) = setup();
        let ty = registry.register_type("t.Value", None, |_| {}).unwrap();
        let value = registry.value_of(&ty, |_| {}).unwrap();
        assert!(ValueEncoder::new(&registry, &pools)
            .encode_event(&value)
            .unwrap_err()
            .is_argument_error());
    }

    #[test]
    fn test_buffer_lost_record() {
        let record = encode_buffer_lost(5, 1, 4096).unwrap();
        let mut offset = Offset::new(&record, 0).unwrap();
        assert_eq!(offset.read_u64().unwrap(), EVENT_BUFFER_LOST);
        assert_eq!(offset.read_i64().unwrap(), 5);
        assert_eq!(offset.read_u64().unwrap(), 1);
        assert_eq!(offset.read_u64().unwrap(), 4096);
    }
}
