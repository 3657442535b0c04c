// src/utils/config.rs
//! Recorder configuration
//!
//! Loaded from an optional `flightrec.toml` (or any format the `config`
//! crate understands) merged with `FLIGHTREC_*` environment variables.
//! Nested keys use a double underscore, e.g. `FLIGHTREC_PRODUCER__NAME`.

use crate::recording::compressor::CompressionLevel;
use crate::utils::errors::{RecordingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default per-thread buffer capacity (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Smallest accepted per-thread buffer capacity
pub const MIN_BUFFER_SIZE: usize = 256;

/// Configuration for a single recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Capacity of each per-thread mapped buffer in bytes
    pub buffer_size: usize,

    /// Directory for mapped buffers and flushed segments.
    /// A fresh directory under the system temp dir when unset.
    pub spill_dir: Option<PathBuf>,

    /// Compress the finished stream with zstd
    pub compression: Option<CompressionLevel>,

    /// Tick counter value at recording start (defaults to 0)
    pub start_ticks: Option<i64>,

    /// Wall clock at recording start in epoch nanoseconds (defaults to now)
    pub start_time_nanos: Option<i64>,

    pub producer: ProducerConfig,

    pub logging: LoggingConfig,
}

/// Producer identity written into chunk metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub name: String,
    pub description: String,
    pub uri: String,
}

/// Logging settings used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `flightrec=debug`
    pub filter: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            spill_dir: None,
            compression: None,
            start_ticks: None,
            start_time_nanos: None,
            producer: ProducerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name: "flightrec".to_string(),
            description: "flightrec event producer".to_string(),
            uri: "http://flightrec.dev/producer".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl RecorderConfig {
    /// Load from `flightrec.*` in the working directory and the environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("flightrec").required(false))
            .add_source(Self::environment())
            .build()?;

        let config: RecorderConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file, still honouring environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RecordingError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(Self::environment())
            .build()?;

        let config: RecorderConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("FLIGHTREC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Select the per-thread mapped buffer capacity
    pub fn with_mmap(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_spill_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = Some(level);
        self
    }

    pub fn with_start_ticks(mut self, ticks: i64) -> Self {
        self.start_ticks = Some(ticks);
        self
    }

    pub fn with_start_time_nanos(mut self, nanos: i64) -> Self {
        self.start_time_nanos = Some(nanos);
        self
    }

    pub fn with_producer_name(mut self, name: impl Into<String>) -> Self {
        self.producer.name = name.into();
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(RecordingError::ConfigError(format!(
                "buffer_size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, self.buffer_size
            )));
        }

        if self.buffer_size > u32::MAX as usize {
            return Err(RecordingError::ConfigError(format!(
                "buffer_size must fit a 32-bit record length, got {}",
                self.buffer_size
            )));
        }

        if self.producer.name.is_empty() {
            return Err(RecordingError::ConfigError(
                "producer.name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
