// src/parser/loader.rs
//! Whole-recording loading
//!
//! Accepts a complete stream (`F L R 0x00` + chunks), optionally zstd
//! compressed, and decodes every chunk in order. In-memory loading can
//! decode groups of chunks on scoped threads and merge the results in
//! chunk order.

use crate::format::{unsupported_version, STREAM_HEADER};
use crate::observability::metric_names;
use crate::parser::chunk::{parse_chunk, split_chunks, split_chunks_with, ChunkHeader, ChunkStats};
use crate::parser::dispatcher::ParserOptions;
use crate::parser::metadata::ChunkMetadata;
use crate::parser::sink::{EventCollection, EventCollector, EventSinkFactory};
use crate::recording::compressor::Compressor;
use crate::utils::errors::{RecordingError, Result};
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, info};

/// Outcome of loading a recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub chunks: usize,
    pub events: u64,
    pub skipped: u64,
    pub constants: usize,
    /// Stream size after decompression
    pub bytes: usize,
    pub compressed: bool,
    /// Bytes of an incomplete trailing chunk that were ignored
    pub truncated: usize,
}

impl ParseSummary {
    fn add_chunk(&mut self, stats: &ChunkStats) {
        self.chunks += 1;
        self.events += stats.events;
        self.skipped += stats.skipped;
        self.constants += stats.constants;

        metrics::counter!(metric_names::CHUNKS_PARSED).increment(1);
        metrics::counter!(metric_names::EVENTS_PARSED).increment(stats.events);
    }

    fn log(&self) {
        info!(
            "Loaded recording: {} chunks, {} events ({} skipped)",
            self.chunks, self.events, self.skipped
        );
    }
}

/// Strip compression and the stream header, returning the chunk bytes
fn chunk_bytes(data: &[u8]) -> Result<(Cow<'_, [u8]>, bool)> {
    let (stream, compressed) = if Compressor::is_compressed(data) {
        (Cow::Owned(Compressor::default().decompress(data)?), true)
    } else {
        (Cow::Borrowed(data), false)
    };

    if stream.len() < STREAM_HEADER.len() || stream[..3] != STREAM_HEADER[..3] {
        return Err(RecordingError::format("missing FLR stream magic"));
    }
    if stream[3] != STREAM_HEADER[3] {
        return Err(unsupported_version(stream[3]));
    }

    let body = match stream {
        Cow::Borrowed(bytes) => Cow::Borrowed(&bytes[STREAM_HEADER.len()..]),
        Cow::Owned(mut bytes) => {
            bytes.drain(..STREAM_HEADER.len());
            Cow::Owned(bytes)
        }
    };
    Ok((body, compressed))
}

/// Decode a complete recording into sinks created by `factory`
pub fn parse_recording(
    data: &[u8],
    factory: &mut dyn EventSinkFactory,
    options: ParserOptions,
) -> Result<ParseSummary> {
    let (body, compressed) = chunk_bytes(data)?;
    let (chunks, truncated) = split_chunks_with(&body, options.ignore_truncated_chunk)?;

    let mut summary = ParseSummary {
        bytes: body.len() + STREAM_HEADER.len(),
        compressed,
        truncated,
        ..ParseSummary::default()
    };

    for (index, chunk) in chunks.iter().enumerate() {
        debug!("Parsing chunk {} ({} bytes)", index, chunk.len());
        let stats = parse_chunk(chunk, factory, options)?;
        summary.add_chunk(&stats);
    }

    factory.flush();
    summary.log();
    Ok(summary)
}

/// Decode chunk groups on scoped threads, one collector per group, then
/// merge the collections in chunk order
fn load_parallel(data: &[u8], options: ParserOptions) -> Result<(EventCollection, ParseSummary)> {
    let (body, compressed) = chunk_bytes(data)?;
    let (chunks, truncated) = split_chunks_with(&body, options.ignore_truncated_chunk)?;
    let mut summary = ParseSummary {
        bytes: body.len() + STREAM_HEADER.len(),
        compressed,
        truncated,
        ..ParseSummary::default()
    };
    if chunks.is_empty() {
        return Ok((EventCollection::default(), summary));
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(chunks.len());
    let group_size = chunks.len().div_ceil(workers);
    debug!(
        "Parsing {} chunks on {} threads",
        chunks.len(),
        chunks.len().div_ceil(group_size)
    );

    let results: Vec<Result<(EventCollection, Vec<ChunkStats>)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .chunks(group_size)
            .map(|group| {
                scope.spawn(move || -> Result<(EventCollection, Vec<ChunkStats>)> {
                    let mut collector = EventCollector::new();
                    let stats = group
                        .iter()
                        .map(|chunk| parse_chunk(chunk, &mut collector, options))
                        .collect::<Result<Vec<_>>>()?;
                    collector.flush();
                    Ok((collector.into_collection(), stats))
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(RecordingError::format("chunk decoder thread panicked")))
            })
            .collect()
    });

    let mut collection = EventCollection::default();
    for result in results {
        let (part, stats) = result?;
        stats.iter().for_each(|s| summary.add_chunk(s));
        collection.merge(part);
    }
    summary.log();
    Ok((collection, summary))
}

/// Decode a recording into memory
pub fn load_events(data: &[u8]) -> Result<EventCollection> {
    load_events_with(data, ParserOptions::default())
}

pub fn load_events_with(data: &[u8], options: ParserOptions) -> Result<EventCollection> {
    if options.parallel_chunks {
        return load_parallel(data, options).map(|(collection, _)| collection);
    }
    let mut collector = EventCollector::new();
    parse_recording(data, &mut collector, options)?;
    Ok(collector.into_collection())
}

/// Read and decode a recording file
pub fn load_file<P: AsRef<Path>>(path: P, options: ParserOptions) -> Result<EventCollection> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| {
        RecordingError::StorageFailed(format!("Failed to read {}: {}", path.display(), e))
    })?;
    load_events_with(&data, options)
}

/// Metadata of every chunk, without decoding events
pub fn read_chunk_metadata(data: &[u8]) -> Result<Vec<ChunkMetadata>> {
    let (body, _) = chunk_bytes(data)?;
    split_chunks(&body)?
        .into_iter()
        .map(|chunk| {
            let header = ChunkHeader::read(chunk, 0)?;
            ChunkMetadata::read(chunk, header.metadata_offset)
        })
        .collect()
}
