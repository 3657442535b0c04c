// src/recording/types.rs
//! Writer-side type registry
//!
//! Every recording owns one registry. Types keep the id they were given for
//! the life of the recording; registering a name twice returns the first
//! registration. Builtins plus the predefined annotation and pool types are
//! installed when the registry is created.

use crate::format::{content_type, DataType, FIRST_TYPE_ID};
use crate::recording::value::{FieldValue, TypedValue, TypedValueBuilder};
use crate::utils::errors::{RecordingError, Result};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Supertype of every event type
pub const EVENT_SUPERTYPE: &str = "flightrec.Event";

/// Supertype of every annotation type
pub const ANNOTATION_SUPERTYPE: &str = "flightrec.Annotation";

/// Names of the predefined types
pub mod names {
    pub const LABEL: &str = "flightrec.Label";
    pub const DESCRIPTION: &str = "flightrec.Description";
    pub const TIMESTAMP: &str = "flightrec.Timestamp";
    pub const TIMESPAN: &str = "flightrec.Timespan";
    pub const DATA_AMOUNT: &str = "flightrec.DataAmount";
    pub const PERCENTAGE: &str = "flightrec.Percentage";
    pub const MEMORY_ADDRESS: &str = "flightrec.MemoryAddress";
    pub const UNSIGNED: &str = "flightrec.Unsigned";
    pub const CATEGORY: &str = "flightrec.Category";

    pub const THREAD_GROUP: &str = "flightrec.ThreadGroup";
    pub const THREAD: &str = "flightrec.Thread";
    pub const STACK_FRAME: &str = "flightrec.StackFrame";
    pub const STACK_TRACE: &str = "flightrec.StackTrace";
}

/// Units accepted by the `Timestamp` and `Timespan` annotations
pub mod units {
    pub const TICKS: &str = "TICKS";
    pub const NANOSECONDS: &str = "NANOSECONDS";
    pub const MILLISECONDS: &str = "MILLISECONDS";
    pub const NANOSECONDS_SINCE_EPOCH: &str = "NANOSECONDS_SINCE_EPOCH";
    pub const MILLISECONDS_SINCE_EPOCH: &str = "MILLISECONDS_SINCE_EPOCH";
}

/// Primitive types every registry knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    /// UTF-8 text, always stored in a constant pool
    Text,
}

impl Builtin {
    pub const ALL: [Builtin; 9] = [
        Builtin::Byte,
        Builtin::Char,
        Builtin::Short,
        Builtin::Int,
        Builtin::Long,
        Builtin::Float,
        Builtin::Double,
        Builtin::Boolean,
        Builtin::Text,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            Builtin::Byte => "byte",
            Builtin::Char => "char",
            Builtin::Short => "short",
            Builtin::Int => "int",
            Builtin::Long => "long",
            Builtin::Float => "float",
            Builtin::Double => "double",
            Builtin::Boolean => "boolean",
            Builtin::Text => "text",
        }
    }

    /// Wire type of a value. `unsigned` picks the U* integer variant.
    pub fn data_type(self, unsigned: bool) -> DataType {
        match (self, unsigned) {
            (Builtin::Byte, false) => DataType::S1,
            (Builtin::Byte, true) => DataType::U1,
            (Builtin::Short, false) => DataType::S2,
            (Builtin::Short, true) => DataType::U2,
            (Builtin::Int, false) => DataType::S4,
            (Builtin::Int, true) => DataType::U4,
            (Builtin::Long, false) => DataType::S8,
            (Builtin::Long, true) => DataType::U8,
            (Builtin::Char, _) => DataType::Char,
            (Builtin::Float, _) => DataType::Float,
            (Builtin::Double, _) => DataType::Double,
            (Builtin::Boolean, _) => DataType::Boolean,
            // constant reference
            (Builtin::Text, _) => DataType::U8,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Builtin::Byte | Builtin::Short | Builtin::Int | Builtin::Long
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Builtin::Float | Builtin::Double)
    }

    /// Value written when a field is left unset
    pub fn default_value(self) -> FieldValue {
        match self {
            Builtin::Byte => FieldValue::Byte(0),
            Builtin::Char => FieldValue::Char('\0'),
            Builtin::Short => FieldValue::Short(0),
            Builtin::Int => FieldValue::Int(0),
            Builtin::Long => FieldValue::Long(0),
            Builtin::Float => FieldValue::Float(0.0),
            Builtin::Double => FieldValue::Double(0.0),
            Builtin::Boolean => FieldValue::Boolean(false),
            Builtin::Text => FieldValue::Null,
        }
    }

    /// Whether `value` can be stored in a field of this type
    pub fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (Builtin::Byte, FieldValue::Byte(_))
                | (Builtin::Char, FieldValue::Char(_))
                | (Builtin::Short, FieldValue::Short(_))
                | (Builtin::Int, FieldValue::Int(_))
                | (Builtin::Long, FieldValue::Long(_))
                | (Builtin::Float, FieldValue::Float(_))
                | (Builtin::Double, FieldValue::Double(_))
                | (Builtin::Boolean, FieldValue::Boolean(_))
                | (Builtin::Text, FieldValue::Text(_))
        )
    }
}

/// An annotation attached to a type or field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    type_name: String,
    value: Option<String>,
}

impl Annotation {
    pub fn new(type_name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.map(str::to_string),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Implicit fields an event type carries besides `endTime`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTraits {
    pub start_time: bool,
    pub thread: bool,
    pub stack_trace: bool,
}

impl Default for EventTraits {
    fn default() -> Self {
        Self {
            start_time: true,
            thread: true,
            stack_trace: false,
        }
    }
}

/// Type of a field as given to the structure builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Builtin(Builtin),
    /// Any registered type; may be registered after the referencing type
    Named(String),
    /// The type being built
    SelfType,
}

impl From<Builtin> for TypeRef {
    fn from(builtin: Builtin) -> Self {
        TypeRef::Builtin(builtin)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        TypeRef::Named(name.to_string())
    }
}

impl From<String> for TypeRef {
    fn from(name: String) -> Self {
        TypeRef::Named(name)
    }
}

impl From<&Arc<Type>> for TypeRef {
    fn from(ty: &Arc<Type>) -> Self {
        TypeRef::Named(ty.name().to_string())
    }
}

/// A named, typed slot of a composite type
#[derive(Debug)]
pub struct TypedField {
    name: String,
    type_name: String,
    array: bool,
    annotations: Vec<Annotation>,
    target: OnceCell<u64>,
}

impl TypedField {
    fn new(name: &str, type_name: String, array: bool, annotations: Vec<Annotation>) -> Self {
        Self {
            name: name.to_string(),
            type_name,
            array,
            annotations,
            target: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the field's type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_array(&self) -> bool {
        self.array
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, type_name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.type_name == type_name)
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotation(type_name).is_some()
    }

    pub fn label(&self) -> &str {
        self.annotation(names::LABEL)
            .and_then(Annotation::value)
            .unwrap_or(&self.name)
    }

    pub fn description(&self) -> &str {
        self.annotation(names::DESCRIPTION)
            .and_then(Annotation::value)
            .unwrap_or("")
    }

    pub fn is_unsigned(&self) -> bool {
        self.has_annotation(names::UNSIGNED)
    }

    /// Resolve the field's type, caching the id on first success
    pub fn field_type(&self, registry: &TypeRegistry) -> Result<Arc<Type>> {
        if let Some(&id) = self.target.get() {
            return registry.get_by_id(id).ok_or_else(|| {
                RecordingError::argument(format!(
                    "field '{}' references unknown type id {}",
                    self.name, id
                ))
            });
        }
        let ty = registry.get(&self.type_name).ok_or_else(|| {
            RecordingError::argument(format!(
                "field '{}' references unregistered type '{}'",
                self.name, self.type_name
            ))
        })?;
        let _ = self.target.set(ty.id());
        Ok(ty)
    }

    /// Content type id selected by the field's unit annotations
    pub fn content_type(&self) -> Result<u64> {
        for annotation in &self.annotations {
            let unit = annotation.value().unwrap_or(units::TICKS);
            let id = match annotation.type_name() {
                names::TIMESTAMP => match unit {
                    units::TICKS => content_type::TICKS,
                    units::NANOSECONDS_SINCE_EPOCH => content_type::EPOCH_NANOS,
                    units::MILLISECONDS_SINCE_EPOCH => content_type::EPOCH_MILLIS,
                    other => return Err(self.bad_unit(annotation.type_name(), other)),
                },
                names::TIMESPAN => match unit {
                    units::TICKS => content_type::TICKSPAN,
                    units::NANOSECONDS => content_type::NANOS,
                    units::MILLISECONDS => content_type::MILLIS,
                    other => return Err(self.bad_unit(annotation.type_name(), other)),
                },
                names::DATA_AMOUNT => content_type::MEMORY,
                names::PERCENTAGE => content_type::PERCENTAGE,
                names::MEMORY_ADDRESS => content_type::ADDRESS,
                _ => continue,
            };
            return Ok(id);
        }
        Ok(content_type::NONE)
    }

    fn bad_unit(&self, annotation: &str, unit: &str) -> RecordingError {
        RecordingError::argument(format!(
            "field '{}': unit '{}' is not valid for {}",
            self.name, unit, annotation
        ))
    }
}

/// A registered type
#[derive(Debug)]
pub struct Type {
    id: u64,
    name: String,
    supertype: Option<String>,
    builtin: Option<Builtin>,
    constant_pool: bool,
    content_type: u64,
    fields: Vec<TypedField>,
    annotations: Vec<Annotation>,
    event: Option<EventTraits>,
    implicit_fields: usize,
}

impl Type {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supertype(&self) -> Option<&str> {
        self.supertype.as_deref()
    }

    pub fn builtin(&self) -> Option<Builtin> {
        self.builtin
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin.is_some()
    }

    /// Values of this type are written as constant pool references
    pub fn has_constant_pool(&self) -> bool {
        self.constant_pool
    }

    /// Content type id of this type's constant pool
    pub fn content_type_id(&self) -> u64 {
        self.content_type
    }

    /// A pool whose entries are a single bare value
    pub fn is_simple(&self) -> bool {
        self.builtin == Some(Builtin::Text)
    }

    pub fn is_event(&self) -> bool {
        self.event.is_some()
    }

    pub fn is_annotation(&self) -> bool {
        self.supertype.as_deref() == Some(ANNOTATION_SUPERTYPE)
    }

    pub fn event_traits(&self) -> Option<EventTraits> {
        self.event
    }

    /// All fields, implicit event fields first
    pub fn fields(&self) -> &[TypedField] {
        &self.fields
    }

    /// Fields declared by the registering code
    pub fn declared_fields(&self) -> &[TypedField] {
        &self.fields[self.implicit_fields..]
    }

    pub fn implicit_field_count(&self) -> usize {
        self.implicit_fields
    }

    pub fn field(&self, name: &str) -> Option<(usize, &TypedField)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, type_name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.type_name == type_name)
    }

    pub fn label(&self) -> &str {
        self.annotation(names::LABEL)
            .and_then(Annotation::value)
            .unwrap_or(&self.name)
    }

    pub fn description(&self) -> &str {
        self.annotation(names::DESCRIPTION)
            .and_then(Annotation::value)
            .unwrap_or("")
    }

    /// Slash separated category path ending in the type name
    pub fn path(&self) -> String {
        match self.annotation(names::CATEGORY).and_then(Annotation::value) {
            Some(category) => format!("{}/{}", category.trim_matches('/'), self.name),
            None => self.name.replace('.', "/"),
        }
    }
}

/// Collects the structure of a type during registration
#[derive(Debug)]
pub struct TypeStructureBuilder {
    fields: Vec<PendingField>,
    annotations: Vec<Annotation>,
}

#[derive(Debug)]
struct PendingField {
    name: String,
    ty: TypeRef,
    array: bool,
    annotations: Vec<Annotation>,
}

/// Per-field options for [`TypeStructureBuilder::add_field_with`]
#[derive(Debug, Default)]
pub struct FieldBuilder {
    array: bool,
    annotations: Vec<Annotation>,
}

impl FieldBuilder {
    pub fn array(&mut self) -> &mut Self {
        self.array = true;
        self
    }

    pub fn add_annotation(&mut self, type_name: &str, value: Option<&str>) -> &mut Self {
        self.annotations.push(Annotation::new(type_name, value));
        self
    }
}

impl TypeStructureBuilder {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn add_field(&mut self, name: &str, ty: impl Into<TypeRef>) -> &mut Self {
        self.add_field_with(name, ty, |_| {})
    }

    pub fn add_array_field(&mut self, name: &str, ty: impl Into<TypeRef>) -> &mut Self {
        self.add_field_with(name, ty, |f| {
            f.array();
        })
    }

    pub fn add_field_with(
        &mut self,
        name: &str,
        ty: impl Into<TypeRef>,
        configure: impl FnOnce(&mut FieldBuilder),
    ) -> &mut Self {
        let mut field = FieldBuilder::default();
        configure(&mut field);
        self.fields.push(PendingField {
            name: name.to_string(),
            ty: ty.into(),
            array: field.array,
            annotations: field.annotations,
        });
        self
    }

    pub fn add_annotation(&mut self, type_name: &str, value: Option<&str>) -> &mut Self {
        self.annotations.push(Annotation::new(type_name, value));
        self
    }

    /// Reference to the type under construction
    pub fn self_type(&self) -> TypeRef {
        TypeRef::SelfType
    }
}

struct TypeSpec {
    name: String,
    supertype: Option<String>,
    builtin: Option<Builtin>,
    constant_pool: bool,
    content_type: Option<u64>,
    event: Option<EventTraits>,
    implicit: Vec<PendingField>,
    structure: TypeStructureBuilder,
}

struct RegistryInner {
    by_name: HashMap<String, Arc<Type>>,
    by_id: Vec<Arc<Type>>,
}

/// Types of one recording, keyed by name and by id
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
    builtins: Vec<Arc<Type>>,
}

impl TypeRegistry {
    /// Registry with builtins and the predefined types installed
    pub fn new() -> Result<Self> {
        let mut registry = Self {
            inner: RwLock::new(RegistryInner {
                by_name: HashMap::new(),
                by_id: Vec::new(),
            }),
            builtins: Vec::with_capacity(Builtin::ALL.len()),
        };

        for builtin in Builtin::ALL {
            let ty = registry.install(TypeSpec {
                name: builtin.type_name().to_string(),
                supertype: None,
                builtin: Some(builtin),
                constant_pool: builtin == Builtin::Text,
                content_type: None,
                event: None,
                implicit: Vec::new(),
                structure: TypeStructureBuilder::new(),
            })?;
            registry.builtins.push(ty);
        }

        registry.install_predefined()?;
        Ok(registry)
    }

    fn install_predefined(&self) -> Result<()> {
        for name in [
            names::LABEL,
            names::DESCRIPTION,
            names::TIMESTAMP,
            names::TIMESPAN,
            names::DATA_AMOUNT,
            names::CATEGORY,
        ] {
            self.register_annotation_type(name, |b| {
                b.add_field("value", Builtin::Text);
            })?;
        }
        for name in [names::PERCENTAGE, names::MEMORY_ADDRESS, names::UNSIGNED] {
            self.register_annotation_type(name, |_| {})?;
        }

        self.register_type(names::THREAD_GROUP, None, |b| {
            b.add_field("parent", b.self_type())
                .add_field("name", Builtin::Text);
        })?;
        self.install(pool_spec(names::THREAD, content_type::THREAD, |b| {
            b.add_field("name", Builtin::Text)
                .add_field("osThreadId", Builtin::Long)
                .add_field("threadId", Builtin::Long)
                .add_field("group", names::THREAD_GROUP);
        }))?;
        self.register_type(names::STACK_FRAME, None, |b| {
            b.add_field("function", Builtin::Text)
                .add_field("file", Builtin::Text)
                .add_field("line", Builtin::Int);
        })?;
        self.install(pool_spec(names::STACK_TRACE, content_type::STACK_TRACE, |b| {
            b.add_field("truncated", Builtin::Boolean)
                .add_array_field("frames", names::STACK_FRAME);
        }))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Type>> {
        self.inner.read().by_name.get(name).cloned()
    }

    pub fn get_by_id(&self, id: u64) -> Option<Arc<Type>> {
        let index = id.checked_sub(FIRST_TYPE_ID)?;
        self.inner.read().by_id.get(usize::try_from(index).ok()?).cloned()
    }

    pub fn builtin(&self, builtin: Builtin) -> &Arc<Type> {
        &self.builtins[builtin as usize]
    }

    /// Snapshot of all types in id order
    pub fn types(&self) -> Vec<Arc<Type>> {
        self.inner.read().by_id.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a constant-pool backed composite type
    pub fn register_type(
        &self,
        name: &str,
        supertype: Option<&str>,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        self.register_type_with(name, supertype, true, build)
    }

    /// Register a composite type whose values are written inline
    pub fn register_inline_type(
        &self,
        name: &str,
        supertype: Option<&str>,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        self.register_type_with(name, supertype, false, build)
    }

    pub fn register_type_with(
        &self,
        name: &str,
        supertype: Option<&str>,
        constant_pool: bool,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let mut structure = TypeStructureBuilder::new();
        build(&mut structure);
        self.install(TypeSpec {
            name: name.to_string(),
            supertype: supertype.map(str::to_string),
            builtin: None,
            constant_pool,
            content_type: None,
            event: None,
            implicit: Vec::new(),
            structure,
        })
    }

    /// Register an event type with the default implicit fields
    pub fn register_event_type(
        &self,
        name: &str,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        self.register_event_type_with(name, EventTraits::default(), build)
    }

    pub fn register_event_type_with(
        &self,
        name: &str,
        traits: EventTraits,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let mut structure = TypeStructureBuilder::new();
        build(&mut structure);
        self.install(TypeSpec {
            name: name.to_string(),
            supertype: Some(EVENT_SUPERTYPE.to_string()),
            builtin: None,
            constant_pool: false,
            content_type: None,
            event: Some(traits),
            implicit: implicit_fields(traits),
            structure,
        })
    }

    pub fn register_annotation_type(
        &self,
        name: &str,
        build: impl FnOnce(&mut TypeStructureBuilder),
    ) -> Result<Arc<Type>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let mut structure = TypeStructureBuilder::new();
        build(&mut structure);
        self.install(TypeSpec {
            name: name.to_string(),
            supertype: Some(ANNOTATION_SUPERTYPE.to_string()),
            builtin: None,
            constant_pool: false,
            content_type: None,
            event: None,
            implicit: Vec::new(),
            structure,
        })
    }

    /// Build a value of `ty`; fields left unset are written as defaults
    pub fn value_of(
        &self,
        ty: &Arc<Type>,
        build: impl FnOnce(&mut TypedValueBuilder<'_>),
    ) -> Result<TypedValue> {
        let mut builder = TypedValueBuilder::new(self, Arc::clone(ty));
        build(&mut builder);
        builder.finish()
    }

    /// Box a builtin value, checking it matches `builtin`
    pub fn builtin_value(&self, builtin: Builtin, value: impl Into<FieldValue>) -> Result<FieldValue> {
        let value = value.into();
        if !builtin.accepts(&value) {
            return Err(RecordingError::argument(format!(
                "{:?} is not a valid {} value",
                value,
                builtin.type_name()
            )));
        }
        Ok(value)
    }

    fn install(&self, spec: TypeSpec) -> Result<Arc<Type>> {
        if spec.name.trim().is_empty() {
            return Err(RecordingError::argument("type name must not be empty"));
        }

        let annotations = spec.structure.annotations;
        self.check_annotations(&spec.name, &annotations)?;
        if spec.constant_pool && spec.event.is_some() {
            return Err(RecordingError::argument(format!(
                "event type '{}' cannot be constant pool backed",
                spec.name
            )));
        }

        let implicit_count = spec.implicit.len();
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(implicit_count + spec.structure.fields.len());
        for pending in spec.implicit.into_iter().chain(spec.structure.fields) {
            if pending.name.is_empty() {
                return Err(RecordingError::argument(format!(
                    "type '{}' has a field with an empty name",
                    spec.name
                )));
            }
            if !seen.insert(pending.name.clone()) {
                return Err(RecordingError::argument(format!(
                    "type '{}' declares field '{}' more than once",
                    spec.name, pending.name
                )));
            }
            self.check_annotations(&spec.name, &pending.annotations)?;

            let (type_name, builtin) = match pending.ty {
                TypeRef::Builtin(b) => (b.type_name().to_string(), Some(b)),
                TypeRef::Named(n) => (n, None),
                TypeRef::SelfType => (spec.name.clone(), None),
            };
            let field = TypedField::new(&pending.name, type_name, pending.array, pending.annotations);

            let unit = field.content_type()?;
            if unit != content_type::NONE && !builtin.is_some_and(Builtin::is_numeric) {
                return Err(RecordingError::argument(format!(
                    "field '{}' of '{}' has a unit annotation but is not numeric",
                    field.name, spec.name
                )));
            }
            if let Some(b) = builtin {
                let _ = field.target.set(self.builtin(b).id());
            }
            fields.push(field);
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_name.get(&spec.name) {
            return Ok(Arc::clone(existing));
        }

        let id = FIRST_TYPE_ID + inner.by_id.len() as u64;
        for field in &fields {
            if field.type_name == spec.name {
                let _ = field.target.set(id);
            } else if field.target.get().is_none() {
                if let Some(target) = inner.by_name.get(&field.type_name) {
                    let _ = field.target.set(target.id);
                }
            }
        }

        let ty = Arc::new(Type {
            id,
            name: spec.name,
            supertype: spec.supertype,
            builtin: spec.builtin,
            constant_pool: spec.constant_pool,
            content_type: spec.content_type.unwrap_or(id),
            fields,
            annotations,
            event: spec.event,
            implicit_fields: implicit_count,
        });

        debug!("Registered type {} with id {}", ty.name, ty.id);
        inner.by_name.insert(ty.name.clone(), Arc::clone(&ty));
        inner.by_id.push(Arc::clone(&ty));
        Ok(ty)
    }

    fn check_annotations(&self, owner: &str, annotations: &[Annotation]) -> Result<()> {
        for annotation in annotations {
            match self.get(annotation.type_name()) {
                Some(ty) if ty.is_annotation() => {}
                _ => {
                    return Err(RecordingError::argument(format!(
                        "'{}' is annotated with '{}' which is not a registered annotation type",
                        owner,
                        annotation.type_name()
                    )))
                }
            }
        }
        Ok(())
    }
}

fn pool_spec(name: &str, content: u64, build: impl FnOnce(&mut TypeStructureBuilder)) -> TypeSpec {
    let mut structure = TypeStructureBuilder::new();
    build(&mut structure);
    TypeSpec {
        name: name.to_string(),
        supertype: None,
        builtin: None,
        constant_pool: true,
        content_type: Some(content),
        event: None,
        implicit: Vec::new(),
        structure,
    }
}

fn implicit_fields(traits: EventTraits) -> Vec<PendingField> {
    use crate::format::fields;

    let ticks = || vec![Annotation::new(names::TIMESTAMP, Some(units::TICKS))];
    let mut implicit = vec![PendingField {
        name: fields::END_TIME.to_string(),
        ty: TypeRef::Builtin(Builtin::Long),
        array: false,
        annotations: ticks(),
    }];
    if traits.start_time {
        implicit.push(PendingField {
            name: fields::START_TIME.to_string(),
            ty: TypeRef::Builtin(Builtin::Long),
            array: false,
            annotations: ticks(),
        });
    }
    if traits.thread {
        implicit.push(PendingField {
            name: fields::EVENT_THREAD.to_string(),
            ty: TypeRef::Named(names::THREAD.to_string()),
            array: false,
            annotations: Vec::new(),
        });
    }
    if traits.stack_trace {
        implicit.push(PendingField {
            name: fields::STACK_TRACE.to_string(),
            ty: TypeRef::Named(names::STACK_TRACE.to_string()),
            array: false,
            annotations: Vec::new(),
        });
    }
    implicit
}
