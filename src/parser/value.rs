// src/parser/value.rs
//! Decoded values handed to event sinks

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// One decoded field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    /// Signed integers of any width
    Long(i64),
    /// Unsigned integers of any width
    Unsigned(u64),
    Float(f32),
    Double(f64),
    Char(char),
    Text(Arc<str>),
    /// Absolute time in epoch nanoseconds
    Timestamp(i64),
    /// Time span in nanoseconds
    Duration(i64),
    /// Amount of memory in bytes
    Memory(u64),
    Address(u64),
    /// Fraction, 1.0 meaning 100%
    Percentage(f64),
    Array(Arc<[Value]>),
    Struct(Arc<StructValue>),
    /// Constant pool reference that has not been resolved yet.
    /// Only ever stored inside constant maps.
    Reference { content_type: u64, id: u64 },
    /// Stand-in for a constant that is missing or cyclic
    Placeholder { content_type: Arc<str>, id: u64 },
}

/// Decoded pool entry or nested structure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructValue {
    pub type_name: Arc<str>,
    pub fields: Vec<(Arc<str>, Value)>,
}

impl StructValue {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field.as_ref() == name)
            .map(|(_, value)| value)
    }
}

impl Value {
    pub fn text(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of numeric and time values
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Long(v) | Value::Timestamp(v) | Value::Duration(v) => Some(v),
            Value::Unsigned(v) | Value::Memory(v) | Value::Address(v) => i64::try_from(v).ok(),
            Value::Boolean(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) | Value::Percentage(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a field of a struct value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_struct().and_then(|s| s.get(name))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "'{}'", v),
            Value::Text(v) => write!(f, "\"{}\"", v),
            Value::Timestamp(v) => write!(f, "{}", Utc.timestamp_nanos(*v).to_rfc3339()),
            Value::Duration(v) => write!(f, "{} ns", v),
            Value::Memory(v) => write!(f, "{} B", v),
            Value::Address(v) => write!(f, "{:#x}", v),
            Value::Percentage(v) => write!(f, "{:.2}%", v * 100.0),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Struct(value) => {
                write!(f, "{} {{", value.type_name)?;
                for (i, (name, item)) in value.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {} = {}", name, item)?;
                }
                write!(f, " }}")
            }
            Value::Reference { content_type, id } => write!(f, "ref({}:{})", content_type, id),
            Value::Placeholder { content_type, id } => write!(f, "<{} #{}>", content_type, id),
        }
    }
}
