// src/recording/value.rs
//! Values written into events and constant pools

use crate::recording::types::{Type, TypeRegistry, TypedField};
use crate::utils::errors::{RecordingError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single field value
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Text(String),
    Value(TypedValue),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Byte(_) => "byte",
            FieldValue::Char(_) => "char",
            FieldValue::Short(_) => "short",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Text(_) => "text",
            FieldValue::Value(_) => "value",
            FieldValue::Array(_) => "array",
        }
    }
}

// Floats compare by bit pattern so values can key a constant pool
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Boolean(a), Boolean(b)) => a == b,
            (Text(a), Text(b)) => a == b,
            (Value(a), Value(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FieldValue::Null => {}
            FieldValue::Byte(v) => v.hash(state),
            FieldValue::Char(v) => v.hash(state),
            FieldValue::Short(v) => v.hash(state),
            FieldValue::Int(v) => v.hash(state),
            FieldValue::Long(v) => v.hash(state),
            FieldValue::Float(v) => v.to_bits().hash(state),
            FieldValue::Double(v) => v.to_bits().hash(state),
            FieldValue::Boolean(v) => v.hash(state),
            FieldValue::Text(v) => v.hash(state),
            FieldValue::Value(v) => v.hash(state),
            FieldValue::Array(v) => v.hash(state),
        }
    }
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant(value)
                }
            }
        )*
    };
}

field_value_from!(
    i8 => Byte,
    char => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    String => Text,
    TypedValue => Value,
);

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<&TypedValue> for FieldValue {
    fn from(value: &TypedValue) -> Self {
        FieldValue::Value(value.clone())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        FieldValue::Array(values.into_iter().map(Into::into).collect())
    }
}

struct TypedValueInner {
    ty: Arc<Type>,
    values: Vec<Option<FieldValue>>,
}

/// A value of a composite type; cheap to clone
#[derive(Clone)]
pub struct TypedValue(Arc<TypedValueInner>);

impl TypedValue {
    pub fn get_type(&self) -> &Arc<Type> {
        &self.0.ty
    }

    pub fn type_id(&self) -> u64 {
        self.0.ty.id()
    }

    /// Field values in declaration order; `None` for unset fields
    pub fn values(&self) -> &[Option<FieldValue>] {
        &self.0.values
    }

    pub fn field_value(&self, name: &str) -> Option<&FieldValue> {
        let (index, _) = self.0.ty.field(name)?;
        self.0.values.get(index)?.as_ref()
    }

    /// Copy with unset fields filled in by `default_for`
    pub fn with_defaults(&self, mut default_for: impl FnMut(&TypedField) -> Option<FieldValue>) -> Self {
        let values = self
            .0
            .ty
            .fields()
            .iter()
            .zip(&self.0.values)
            .map(|(field, value)| match value {
                Some(v) => Some(v.clone()),
                None => default_for(field),
            })
            .collect();
        TypedValue(Arc::new(TypedValueInner {
            ty: Arc::clone(&self.0.ty),
            values,
        }))
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.type_id() == other.type_id() && self.0.values == other.0.values)
    }
}

impl Eq for TypedValue {}

impl Hash for TypedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id().hash(state);
        self.0.values.hash(state);
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.0.ty.name());
        for (field, value) in self.0.ty.fields().iter().zip(&self.0.values) {
            if let Some(value) = value {
                s.field(field.name(), value);
            }
        }
        s.finish()
    }
}

/// Sets the fields of a [`TypedValue`]. The first invalid `put` is reported
/// when the value is finished.
pub struct TypedValueBuilder<'r> {
    registry: &'r TypeRegistry,
    ty: Arc<Type>,
    values: Vec<Option<FieldValue>>,
    error: Option<RecordingError>,
}

impl<'r> TypedValueBuilder<'r> {
    pub(crate) fn new(registry: &'r TypeRegistry, ty: Arc<Type>) -> Self {
        let values = vec![None; ty.fields().len()];
        Self {
            registry,
            ty,
            values,
            error: None,
        }
    }

    pub fn get_type(&self) -> &Arc<Type> {
        &self.ty
    }

    pub fn put(&mut self, name: &str, value: impl Into<FieldValue>) -> &mut Self {
        if self.error.is_none() {
            if let Err(e) = self.try_put(name, value.into()) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Set a composite field from a nested builder
    pub fn put_value(&mut self, name: &str, build: impl FnOnce(&mut TypedValueBuilder<'_>)) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        let nested = self
            .field(name)
            .and_then(|(_, field)| field.field_type(self.registry))
            .and_then(|ty| self.registry.value_of(&ty, build));
        match nested {
            Ok(value) => self.put(name, value),
            Err(e) => {
                self.error = Some(e);
                self
            }
        }
    }

    pub fn put_null(&mut self, name: &str) -> &mut Self {
        self.put(name, FieldValue::Null)
    }

    fn field(&self, name: &str) -> Result<(usize, &TypedField)> {
        self.ty.field(name).ok_or_else(|| {
            RecordingError::argument(format!(
                "type '{}' has no field '{}'",
                self.ty.name(),
                name
            ))
        })
    }

    fn try_put(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let (index, field) = self.field(name)?;
        check_field_value(self.registry, field, &value)?;
        self.values[index] = Some(value);
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<TypedValue> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(TypedValue(Arc::new(TypedValueInner {
            ty: self.ty,
            values: self.values,
        })))
    }
}

/// Check that `value` matches the field's declared shape and type
pub(crate) fn check_field_value(
    registry: &TypeRegistry,
    field: &TypedField,
    value: &FieldValue,
) -> Result<()> {
    let target = field.field_type(registry)?;
    match value {
        FieldValue::Null => Ok(()),
        FieldValue::Array(items) => {
            if !field.is_array() {
                return Err(RecordingError::argument(format!(
                    "field '{}' is scalar but was given an array",
                    field.name()
                )));
            }
            items
                .iter()
                .try_for_each(|item| check_scalar(field, &target, item))
        }
        scalar => {
            if field.is_array() {
                return Err(RecordingError::argument(format!(
                    "field '{}' is an array but was given a single {}",
                    field.name(),
                    scalar.kind()
                )));
            }
            check_scalar(field, &target, scalar)
        }
    }
}

fn check_scalar(field: &TypedField, target: &Type, value: &FieldValue) -> Result<()> {
    let ok = match (target.builtin(), value) {
        (_, FieldValue::Null) => true,
        (Some(builtin), value) => builtin.accepts(value),
        (None, FieldValue::Value(v)) => v.type_id() == target.id(),
        (None, _) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(RecordingError::argument(format!(
            "field '{}' of type '{}' cannot hold a {} value",
            field.name(),
            target.name(),
            value.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::types::{names, Builtin};
    use std::collections::HashSet;

    fn registry_with_point() -> (TypeRegistry, Arc<Type>) {
        let registry = TypeRegistry::new().unwrap();
        let point = registry
            .register_type("demo.Point", None, |b| {
                b.add_field("x", Builtin::Int)
                    .add_field("y", Builtin::Int)
                    .add_field("label", Builtin::Text)
                    .add_array_field("tags", Builtin::Text);
            })
            .unwrap();
        (registry, point)
    }

    #[test]
    fn test_build_value() {
        let (registry, point) = registry_with_point();
        let value = registry
            .value_of(&point, |b| {
                b.put("x", 1).put("y", 2).put("tags", vec!["a", "b"]);
            })
            .unwrap();

        assert_eq!(value.field_value("x"), Some(&FieldValue::Int(1)));
        assert_eq!(value.field_value("label"), None);
        assert_eq!(
            value.field_value("tags"),
            Some(&FieldValue::Array(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_scalar_array_mismatch() {
        let (registry, point) = registry_with_point();
        let err = registry
            .value_of(&point, |b| {
                b.put("x", vec![1, 2]);
            })
            .unwrap_err();
        assert!(err.is_argument_error());

        let err = registry
            .value_of(&point, |b| {
                b.put("tags", "single");
            })
            .unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_type_mismatch_and_unknown_field() {
        let (registry, point) = registry_with_point();
        assert!(registry
            .value_of(&point, |b| {
                b.put("x", 1i64);
            })
            .is_err());
        assert!(registry
            .value_of(&point, |b| {
                b.put("z", 1);
            })
            .is_err());
    }

    #[test]
    fn test_first_error_wins() {
        let (registry, point) = registry_with_point();
        let err = registry
            .value_of(&point, |b| {
                b.put("missing", 1).put("x", "oops");
            })
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_nested_value() {
        let registry = TypeRegistry::new().unwrap();
        let thread = registry.get(names::THREAD).unwrap();
        let value = registry
            .value_of(&thread, |b| {
                b.put("name", "main").put_value("group", |g| {
                    g.put("name", "system");
                });
            })
            .unwrap();

        let Some(FieldValue::Value(group)) = value.field_value("group") else {
            panic!("group not set");
        };
        assert_eq!(group.field_value("name"), Some(&FieldValue::Text("system".into())));

        // a value of another type is rejected
        let err = registry
            .value_of(&thread, |b| {
                b.put("group", value.clone());
            })
            .unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_equal_values_hash_alike() {
        let (registry, point) = registry_with_point();
        let build = || {
            registry
                .value_of(&point, |b| {
                    b.put("x", 3).put("label", "p");
                })
                .unwrap()
        };
        let mut set = HashSet::new();
        set.insert(FieldValue::from(build()));
        set.insert(FieldValue::from(build()));
        assert_eq!(set.len(), 1);

        set.insert(FieldValue::Double(f64::NAN));
        set.insert(FieldValue::Double(f64::NAN));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_with_defaults_keeps_set_fields() {
        let (registry, point) = registry_with_point();
        let value = registry
            .value_of(&point, |b| {
                b.put("x", 5);
            })
            .unwrap();
        let filled = value.with_defaults(|field| match field.name() {
            "y" => Some(FieldValue::Int(9)),
            _ => None,
        });
        assert_eq!(filled.field_value("x"), Some(&FieldValue::Int(5)));
        assert_eq!(filled.field_value("y"), Some(&FieldValue::Int(9)));
        assert_eq!(filled.field_value("label"), None);
    }
}
