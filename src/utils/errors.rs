// src/utils/errors.rs
//! Error types for reading and writing recordings

use thiserror::Error;

/// Errors produced by the recorder and the chunk reader
#[derive(Error, Debug)]
pub enum RecordingError {
    /// Structural violation in recording bytes. Aborts the whole chunk.
    #[error("Invalid recording format: {0}")]
    InvalidFormat(String),

    /// Invalid call on the writer API, raised before any bytes are written
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A write would exceed the fixed capacity of a mapped buffer
    #[error("Buffer overflow: requested {requested} bytes, {available} bytes available")]
    BufferOverflow { requested: usize, available: usize },

    /// A single record does not fit into an empty per-thread buffer
    #[error("Record of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Recording is already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordingError {
    /// Shorthand for format errors raised by the reader
    pub fn format(message: impl Into<String>) -> Self {
        RecordingError::InvalidFormat(message.into())
    }

    /// Shorthand for argument errors raised by the writer
    pub fn argument(message: impl Into<String>) -> Self {
        RecordingError::InvalidArgument(message.into())
    }

    pub fn is_format_error(&self) -> bool {
        matches!(self, RecordingError::InvalidFormat(_))
    }

    pub fn is_argument_error(&self) -> bool {
        matches!(self, RecordingError::InvalidArgument(_))
    }
}

impl From<config::ConfigError> for RecordingError {
    fn from(err: config::ConfigError) -> Self {
        RecordingError::ConfigError(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RecordingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RecordingError::BufferOverflow {
            requested: 16,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "Buffer overflow: requested 16 bytes, 4 bytes available"
        );

        let err = RecordingError::format("truncated record");
        assert!(err.is_format_error());
        assert_eq!(err.to_string(), "Invalid recording format: truncated record");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: RecordingError = io.into();
        assert!(matches!(err, RecordingError::Io(_)));
        assert!(!err.is_argument_error());
    }
}
