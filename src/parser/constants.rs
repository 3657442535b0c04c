// src/parser/constants.rs
//! Constant maps loaded from checkpoint records
//!
//! One [`ConstantMap`] exists per content type. An id may be defined by
//! several checkpoints; lookups pick the first definition whose timestamp is
//! at or after the query time. Entries can reference other pools, possibly
//! in cycles, so resolution is lazy and tracks a per-entry state.

use crate::parser::metadata::ChunkMetadata;
use crate::parser::value::{StructValue, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveState {
    Unresolved,
    Resolving,
    Resolved,
}

#[derive(Debug)]
struct Constant {
    timestamp: i64,
    value: RefCell<Value>,
    state: Cell<ResolveState>,
}

impl Constant {
    fn new(value: Value, timestamp: i64) -> Self {
        Self {
            timestamp,
            value: RefCell::new(value),
            state: Cell::new(ResolveState::Unresolved),
        }
    }
}

/// Most ids are defined exactly once per chunk
#[derive(Debug)]
enum Slot {
    Single(Constant),
    Many(Vec<Constant>),
}

/// Constants of one content type
#[derive(Debug)]
pub struct ConstantMap {
    content_type: u64,
    name: Arc<str>,
    entries: HashMap<u64, Slot>,
    sorted: bool,
}

impl ConstantMap {
    pub fn new(content_type: u64, name: impl Into<Arc<str>>) -> Self {
        Self {
            content_type,
            name: name.into(),
            entries: HashMap::new(),
            sorted: true,
        }
    }

    pub fn content_type(&self) -> u64 {
        self.content_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add one definition of `id`
    pub fn put(&mut self, id: u64, value: Value, timestamp: i64) {
        let constant = Constant::new(value, timestamp);
        match self.entries.remove(&id) {
            None => {
                self.entries.insert(id, Slot::Single(constant));
            }
            Some(Slot::Single(existing)) => {
                self.entries.insert(id, Slot::Many(vec![existing, constant]));
                self.sorted = false;
            }
            Some(Slot::Many(mut list)) => {
                list.push(constant);
                self.entries.insert(id, Slot::Many(list));
                self.sorted = false;
            }
        }
    }

    /// Sort every multi-definition list chronologically
    pub fn set_load_done(&mut self) {
        if self.sorted {
            return;
        }
        for slot in self.entries.values_mut() {
            if let Slot::Many(list) = slot {
                list.sort_by_key(|c| c.timestamp);
            }
        }
        self.sorted = true;
    }

    /// Number of distinct ids
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored value of `id` valid at `at`, unresolved, or a placeholder
    pub fn get(&self, id: u64, at: i64) -> Value {
        match self.lookup(id, at) {
            Some(constant) => constant.value.borrow().clone(),
            None => self.placeholder(id),
        }
    }

    pub fn placeholder(&self, id: u64) -> Value {
        Value::Placeholder {
            content_type: Arc::clone(&self.name),
            id,
        }
    }

    fn lookup(&self, id: u64, at: i64) -> Option<&Constant> {
        match self.entries.get(&id)? {
            Slot::Single(constant) => (constant.timestamp >= at).then_some(constant),
            Slot::Many(list) if self.sorted => {
                let index = list.partition_point(|c| c.timestamp < at);
                list.get(index)
            }
            Slot::Many(list) => list
                .iter()
                .filter(|c| c.timestamp >= at)
                .min_by_key(|c| c.timestamp),
        }
    }
}

/// All constant maps of one chunk
#[derive(Debug, Default)]
pub struct ConstantPools {
    maps: HashMap<u64, ConstantMap>,
}

impl ConstantPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map for every content type the chunk declares
    pub fn for_metadata(metadata: &ChunkMetadata) -> Self {
        let mut pools = Self::new();
        for producer in metadata.producers() {
            for content in &producer.content_types {
                pools
                    .maps
                    .insert(content.id, ConstantMap::new(content.id, content.name.as_str()));
            }
        }
        pools
    }

    pub fn put(&mut self, content_type: u64, id: u64, value: Value, timestamp: i64) {
        self.maps
            .entry(content_type)
            .or_insert_with(|| ConstantMap::new(content_type, content_type.to_string()))
            .put(id, value, timestamp);
    }

    pub fn set_load_done(&mut self) {
        for map in self.maps.values_mut() {
            map.set_load_done();
        }
    }

    pub fn map(&self, content_type: u64) -> Option<&ConstantMap> {
        self.maps.get(&content_type)
    }

    /// Total constants across all maps
    pub fn len(&self) -> usize {
        self.maps.values().map(ConstantMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fully resolved value of `id` in `content_type` at time `at`.
    ///
    /// Id 0 is the null reference. Unknown ids yield a placeholder, and a
    /// reference that re-enters an entry still being resolved yields `Null`.
    pub fn resolve(&self, content_type: u64, id: u64, at: i64) -> Value {
        if id == 0 {
            return Value::Null;
        }
        let Some(map) = self.maps.get(&content_type) else {
            return Value::Placeholder {
                content_type: Arc::from(content_type.to_string()),
                id,
            };
        };
        let Some(constant) = map.lookup(id, at) else {
            return map.placeholder(id);
        };

        match constant.state.get() {
            ResolveState::Resolved => constant.value.borrow().clone(),
            ResolveState::Resolving => {
                trace!(
                    "Cyclic constant reference {}#{} resolved to null",
                    map.name(),
                    id
                );
                Value::Null
            }
            ResolveState::Unresolved => {
                constant.state.set(ResolveState::Resolving);
                let raw = constant.value.borrow().clone();
                let resolved = self.resolve_value(raw, constant.timestamp);
                *constant.value.borrow_mut() = resolved.clone();
                constant.state.set(ResolveState::Resolved);
                resolved
            }
        }
    }

    /// Replace every reference inside `value`
    pub fn resolve_value(&self, value: Value, at: i64) -> Value {
        match value {
            Value::Reference { content_type, id } => self.resolve(content_type, id, at),
            Value::Array(items) if items.iter().any(contains_reference) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item.clone(), at))
                    .collect(),
            ),
            Value::Struct(s) if s.fields.iter().any(|(_, v)| contains_reference(v)) => {
                let fields = s
                    .fields
                    .iter()
                    .map(|(name, v)| (Arc::clone(name), self.resolve_value(v.clone(), at)))
                    .collect();
                Value::Struct(Arc::new(StructValue {
                    type_name: Arc::clone(&s.type_name),
                    fields,
                }))
            }
            other => other,
        }
    }
}

fn contains_reference(value: &Value) -> bool {
    match value {
        Value::Reference { .. } => true,
        Value::Array(items) => items.iter().any(contains_reference),
        Value::Struct(s) => s.fields.iter().any(|(_, v)| contains_reference(v)),
        _ => false,
    }
}
