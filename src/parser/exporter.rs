// src/parser/exporter.rs
//! Export decoded events
//!
//! Supports:
//! - JSON (one document with every event)
//! - JSON lines (one object per event, for streaming into other tools)
//! - Text (human readable, one line per event)

use crate::parser::sink::{CollectedType, EventCollection};
use crate::parser::value::Value;
use crate::utils::errors::{RecordingError, Result};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    JsonLines,
    Text,
}

/// Exporter for decoded recordings
pub struct Exporter {
    format: ExportFormat,
    type_filter: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ExportedEvent<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    fields: Map<String, JsonValue>,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            type_filter: None,
            limit: None,
        }
    }

    /// Only export events whose type identifier equals `identifier`
    pub fn with_type_filter(mut self, identifier: impl Into<String>) -> Self {
        self.type_filter = Some(identifier.into());
        self
    }

    /// Stop after `limit` events
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Export events to string
    pub fn export(&self, collection: &EventCollection) -> Result<String> {
        let events = self.selected(collection);
        debug!("Exporting {} events to {:?} format", events.len(), self.format);

        match self.format {
            ExportFormat::Json => self.export_json(&events),
            ExportFormat::JsonLines => self.export_json_lines(&events),
            ExportFormat::Text => Ok(self.export_text(&events)),
        }
    }

    fn selected<'a>(&self, collection: &'a EventCollection) -> Vec<(&'a CollectedType, &'a [Value])> {
        let events = collection
            .types()
            .iter()
            .filter(|t| {
                self.type_filter
                    .as_deref()
                    .map_or(true, |filter| t.identifier == filter)
            })
            .flat_map(|t| t.events.iter().map(move |e| (t, e.as_slice())));

        match self.limit {
            Some(limit) => events.take(limit).collect(),
            None => events.collect(),
        }
    }

    fn to_exported<'a>(&self, event_type: &'a CollectedType, values: &[Value]) -> Result<ExportedEvent<'a>> {
        let mut fields = Map::new();
        for (field, value) in event_type.fields.iter().zip(values) {
            let json = serde_json::to_value(value).map_err(|e| {
                RecordingError::ExportFailed(format!("JSON serialization error: {}", e))
            })?;
            fields.insert(field.identifier.clone(), json);
        }
        Ok(ExportedEvent {
            event_type: &event_type.identifier,
            fields,
        })
    }

    fn export_json(&self, events: &[(&CollectedType, &[Value])]) -> Result<String> {
        let exported = events
            .iter()
            .map(|(t, values)| self.to_exported(t, values))
            .collect::<Result<Vec<_>>>()?;

        serde_json::to_string_pretty(&exported)
            .map_err(|e| RecordingError::ExportFailed(format!("JSON serialization error: {}", e)))
    }

    fn export_json_lines(&self, events: &[(&CollectedType, &[Value])]) -> Result<String> {
        let mut out = String::new();
        for (t, values) in events {
            let line = serde_json::to_string(&self.to_exported(t, values)?).map_err(|e| {
                RecordingError::ExportFailed(format!("JSON serialization error: {}", e))
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn export_text(&self, events: &[(&CollectedType, &[Value])]) -> String {
        let mut out = String::new();
        for (t, values) in events {
            out.push_str(&t.identifier);
            out.push_str(" {");
            for (field, value) in t.fields.iter().zip(values.iter()) {
                out.push_str(&format!(" {} = {};", field.identifier, value));
            }
            out.push_str(" }\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::readers::ValueKind;
    use crate::parser::sink::{EventCollector, EventSinkFactory, EventTypeInfo, ValueField};

    fn collection() -> EventCollection {
        let mut collector = EventCollector::new();
        let fields = [ValueField {
            identifier: "count".to_string(),
            label: "Count".to_string(),
            description: String::new(),
            kind: ValueKind::Integer,
        }];
        for name in ["a.Event", "b.Event"] {
            let mut sink = collector.create(&EventTypeInfo {
                identifier: name,
                label: name,
                description: "",
                category: &[],
                producer_uri: "",
                fields: &fields,
            });
            sink.add_event(&[Value::Long(1)]);
            sink.add_event(&[Value::Long(2)]);
        }
        collector.into_collection()
    }

    #[test]
    fn test_json_export() {
        let json = Exporter::new(ExportFormat::Json).export(&collection()).unwrap();
        let parsed: JsonValue = serde_json::from_str(&json).unwrap();
        let events = parsed.as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["type"], "a.Event");
        assert_eq!(events[1]["fields"]["count"], 2);
    }

    #[test]
    fn test_filter_and_limit() {
        let lines = Exporter::new(ExportFormat::JsonLines)
            .with_type_filter("b.Event")
            .with_limit(1)
            .export(&collection())
            .unwrap();
        assert_eq!(lines.lines().count(), 1);
        assert!(lines.contains("b.Event"));
    }

    #[test]
    fn test_text_export() {
        let text = Exporter::new(ExportFormat::Text).export(&collection()).unwrap();
        assert_eq!(text.lines().next(), Some("a.Event { count = 1; }"));
    }
}
