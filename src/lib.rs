// src/lib.rs
//! flightrec: chunked binary event recordings
//!
//! This library reads and writes a compact, self-describing event format
//! built from chunks. Each chunk carries its own type metadata and constant
//! pools, so chunks decode independently.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **codec**: varint codec and the bounded record cursor
//! - **format**: wire constants and the metadata descriptor model
//! - **parser**: chunk reader, constant resolution and event dispatch
//! - **recording**: type registry, constant pools and the concurrent mmap writer
//! - **observability**: tracing and metrics bootstrap
//! - **utils**: configuration and error types
//!
//! # Example
//!
//! ```no_run
//! use flightrec::recording::Builtin;
//! use flightrec::{load_events, RecorderConfig, Recording};
//!
//! # fn main() -> flightrec::Result<()> {
//! let recording = Recording::in_memory(RecorderConfig::default())?;
//! let request = recording.register_event_type("app.Request", |b| {
//!     b.add_field("path", Builtin::Text).add_field("status", Builtin::Int);
//! })?;
//! recording.write_event(&request, |e| {
//!     e.put("path", "/health").put("status", 200i32);
//! })?;
//!
//! let events = load_events(&recording.finish()?)?;
//! assert_eq!(events.total_events(), 1);
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod codec;
pub mod format;
pub mod observability;
pub mod parser;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use parser::{load_events, load_events_with, load_file, EventCollection, ParserOptions, Value};
pub use recording::{Recording, RecordingStats};
pub use utils::config::RecorderConfig;
pub use utils::errors::{RecordingError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
