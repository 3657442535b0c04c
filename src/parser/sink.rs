// src/parser/sink.rs
//! Event sinks
//!
//! The dispatcher creates one sink per event type and chunk, handing it the
//! type's field schema, then calls `add_event` with the decoded values in
//! field order. [`EventCollector`] is the in-memory sink used by the loader
//! helpers and the CLI.

use crate::parser::readers::ValueKind;
use crate::parser::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Schema entry of one decoded field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueField {
    pub identifier: String,
    pub label: String,
    pub description: String,
    pub kind: ValueKind,
}

/// Event type as announced to a sink factory
#[derive(Debug, Clone, Copy)]
pub struct EventTypeInfo<'a> {
    pub identifier: &'a str,
    pub label: &'a str,
    pub description: &'a str,
    pub category: &'a [String],
    pub producer_uri: &'a str,
    pub fields: &'a [ValueField],
}

/// Receives the decoded events of one type
pub trait EventSink {
    fn add_event(&mut self, values: &[Value]);
}

/// Creates sinks as event types are discovered
pub trait EventSinkFactory {
    fn create(&mut self, info: &EventTypeInfo<'_>) -> Box<dyn EventSink>;

    /// Called after every chunk has been dispatched
    fn flush(&mut self) {}
}

/// All events of one type
#[derive(Debug, Clone, Serialize)]
pub struct CollectedType {
    pub identifier: String,
    pub label: String,
    pub description: String,
    pub category: Vec<String>,
    pub fields: Vec<ValueField>,
    pub events: Vec<Vec<Value>>,
}

impl CollectedType {
    pub fn field_index(&self, identifier: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.identifier == identifier)
    }

    /// Value of a named field in the `event`-th event
    pub fn value(&self, event: usize, identifier: &str) -> Option<&Value> {
        let index = self.field_index(identifier)?;
        self.events.get(event)?.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Decoded recording held in memory
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventCollection {
    types: Vec<CollectedType>,
}

impl EventCollection {
    pub fn types(&self) -> &[CollectedType] {
        &self.types
    }

    /// First collected type with this identifier
    pub fn get(&self, identifier: &str) -> Option<&CollectedType> {
        self.types.iter().find(|t| t.identifier == identifier)
    }

    /// Events of a type across every schema variant seen
    pub fn events_of<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = (&'a CollectedType, &'a [Value])> + 'a {
        self.types
            .iter()
            .filter(move |t| t.identifier == identifier)
            .flat_map(|t| t.events.iter().map(move |e| (t, e.as_slice())))
    }

    pub fn total_events(&self) -> usize {
        self.types.iter().map(CollectedType::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_events() == 0
    }

    /// Append the events of `other`, joining types with the same
    /// identifier and schema
    pub fn merge(&mut self, other: EventCollection) {
        for incoming in other.types {
            match self
                .types
                .iter_mut()
                .find(|t| t.identifier == incoming.identifier && t.fields == incoming.fields)
            {
                Some(existing) => existing.events.extend(incoming.events),
                None => self.types.push(incoming),
            }
        }
    }
}

/// Sink factory gathering everything into an [`EventCollection`].
///
/// Types with the same identifier and schema are merged across chunks.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    types: Arc<Mutex<Vec<CollectedType>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything collected so far
    pub fn collection(&self) -> EventCollection {
        EventCollection {
            types: self.types.lock().clone(),
        }
    }

    pub fn into_collection(self) -> EventCollection {
        match Arc::try_unwrap(self.types) {
            Ok(types) => EventCollection {
                types: types.into_inner(),
            },
            Err(shared) => EventCollection {
                types: shared.lock().clone(),
            },
        }
    }
}

impl EventSinkFactory for EventCollector {
    fn create(&mut self, info: &EventTypeInfo<'_>) -> Box<dyn EventSink> {
        let mut types = self.types.lock();
        let index = match types
            .iter()
            .position(|t| t.identifier == info.identifier && t.fields == info.fields)
        {
            Some(index) => index,
            None => {
                types.push(CollectedType {
                    identifier: info.identifier.to_string(),
                    label: info.label.to_string(),
                    description: info.description.to_string(),
                    category: info.category.to_vec(),
                    fields: info.fields.to_vec(),
                    events: Vec::new(),
                });
                types.len() - 1
            }
        };

        Box::new(CollectingSink {
            types: Arc::clone(&self.types),
            index,
        })
    }
}

struct CollectingSink {
    types: Arc<Mutex<Vec<CollectedType>>>,
    index: usize,
}

impl EventSink for CollectingSink {
    fn add_event(&mut self, values: &[Value]) {
        self.types.lock()[self.index].events.push(values.to_vec());
    }
}
