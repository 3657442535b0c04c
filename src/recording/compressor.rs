// src/recording/compressor.rs
//! zstd compression of finished recordings
//!
//! A recording stream is compressed as a whole when it is closed. Readers
//! detect the zstd frame magic and decompress transparently.

use crate::utils::errors::{RecordingError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::debug;
use zstd::stream::write::Encoder;

/// zstd frame magic, little-endian 0xFD2FB528
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Compression levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Fast compression (level 1)
    Fast,

    /// Balanced (level 3)
    Balanced,

    /// Best compression (level 19)
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// Compressor using zstd
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Whether `data` starts with a zstd frame
    pub fn is_compressed(data: &[u8]) -> bool {
        data.starts_with(&ZSTD_MAGIC)
    }

    /// Compress a whole buffer
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let level = self.level.as_i32();

        let compressed = zstd::encode_all(data, level).map_err(|e| {
            RecordingError::CompressionFailed(format!("Compression error: {}", e))
        })?;

        debug!(
            "Compressed {} bytes -> {} bytes at level {}",
            data.len(),
            compressed.len(),
            level
        );

        Ok(compressed)
    }

    /// Decompress a whole buffer
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decompressed = zstd::decode_all(data).map_err(|e| {
            RecordingError::CompressionFailed(format!("Decompression error: {}", e))
        })?;

        debug!(
            "Decompressed {} bytes -> {} bytes",
            data.len(),
            decompressed.len()
        );

        Ok(decompressed)
    }

    /// Wrap `sink` in a streaming encoder; call `finish` on it to complete the frame
    pub fn stream_encoder<W: Write>(&self, sink: W) -> Result<Encoder<'static, W>> {
        Encoder::new(sink, self.level.as_i32()).map_err(|e| {
            RecordingError::CompressionFailed(format!("Failed to start encoder: {}", e))
        })
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionLevel::Balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_levels() {
        assert_eq!(CompressionLevel::Fast.as_i32(), 1);
        assert_eq!(CompressionLevel::Balanced.as_i32(), 3);
        assert_eq!(CompressionLevel::Best.as_i32(), 19);
    }

    #[test]
    fn test_compress_decompress() {
        let compressor = Compressor::new(CompressionLevel::Balanced);
        let data = b"FLR\0chunk payload".repeat(100);

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert!(Compressor::is_compressed(&compressed));
        assert!(!Compressor::is_compressed(&data));

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_stream_encoder_matches_decoder() {
        let compressor = Compressor::new(CompressionLevel::Fast);
        let mut encoder = compressor.stream_encoder(Vec::new()).unwrap();
        encoder.write_all(b"first ").unwrap();
        encoder.write_all(b"second").unwrap();
        let out = encoder.finish().unwrap();

        assert!(Compressor::is_compressed(&out));
        assert_eq!(Compressor::default().decompress(&out).unwrap(), b"first second");
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        let mut bad = ZSTD_MAGIC.to_vec();
        bad.extend_from_slice(&[0xFF; 16]);
        let err = Compressor::default().decompress(&bad).unwrap_err();
        assert!(matches!(err, RecordingError::CompressionFailed(_)));
    }

    #[test]
    fn test_level_serde_names() {
        let level: CompressionLevel = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(level, CompressionLevel::Best);
        assert_eq!(serde_json::to_string(&CompressionLevel::Fast).unwrap(), "\"fast\"");
    }
}
