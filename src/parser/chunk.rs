// src/parser/chunk.rs
//! Chunk splitting and single-chunk decoding
//!
//! A chunk is decoded in three passes over its bytes: the metadata record
//! at the end, the checkpoint chain reached through the metadata backlink
//! (loaded oldest first), and finally the body records in order.

use crate::codec::offset::{read_u32_at, read_u64_at, LENGTH_PREFIX};
use crate::codec::Offset;
use crate::format::{BODY_START, EVENT_CHECKPOINT, EVENT_METADATA};
use crate::parser::constants::ConstantPools;
use crate::parser::dispatcher::{EventDispatcher, ParserOptions};
use crate::parser::metadata::ChunkMetadata;
use crate::parser::readers::{ReadContext, StructReader};
use crate::parser::sink::EventSinkFactory;
use crate::utils::errors::{RecordingError, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Fixed prefix of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk-relative offset of the metadata record
    pub metadata_offset: usize,
    /// Total chunk size, metadata record included
    pub size: usize,
}

impl ChunkHeader {
    /// Read the header of the chunk starting at `start` in `data`
    pub fn read(data: &[u8], start: usize) -> Result<Self> {
        let metadata_offset = read_u64_at(data, start)?;
        let available = (data.len() - start) as u64;
        if metadata_offset < BODY_START as u64
            || metadata_offset.saturating_add(LENGTH_PREFIX as u64) > available
        {
            return Err(RecordingError::format(format!(
                "chunk at {} has metadata offset {} outside its {} bytes",
                start, metadata_offset, available
            )));
        }

        let metadata_offset = metadata_offset as usize;
        let metadata_len = read_u32_at(data, start + metadata_offset)? as usize;
        let size = metadata_offset + LENGTH_PREFIX + metadata_len;
        if size as u64 > available {
            return Err(RecordingError::format(format!(
                "chunk at {} declares {} bytes but only {} remain",
                start, size, available
            )));
        }

        Ok(Self {
            metadata_offset,
            size,
        })
    }
}

/// Split the bytes following the stream header into chunks
pub fn split_chunks(data: &[u8]) -> Result<Vec<&[u8]>> {
    Ok(split_chunks_with(data, false)?.0)
}

/// Split into chunks. With `ignore_truncated`, a final chunk that runs past
/// the end of `data` is dropped instead of failing; the second value is the
/// number of bytes dropped.
pub fn split_chunks_with(data: &[u8], ignore_truncated: bool) -> Result<(Vec<&[u8]>, usize)> {
    let mut chunks = Vec::new();
    let mut position = 0;
    while position < data.len() {
        if ignore_truncated && is_truncated(data, position) {
            let dropped = data.len() - position;
            warn!(
                "Ignoring truncated chunk at {} ({} bytes after {} complete chunks)",
                position,
                dropped,
                chunks.len()
            );
            return Ok((chunks, dropped));
        }
        let header = ChunkHeader::read(data, position)?;
        chunks.push(&data[position..position + header.size]);
        position += header.size;
    }
    Ok((chunks, 0))
}

/// Whether the chunk at `start` needs more bytes than `data` holds. A
/// metadata offset pointing into the header is corruption, not truncation.
fn is_truncated(data: &[u8], start: usize) -> bool {
    let available = (data.len() - start) as u64;
    let metadata_offset = match read_u64_at(data, start) {
        Ok(offset) => offset,
        Err(_) => return true,
    };
    if metadata_offset < BODY_START as u64 {
        return false;
    }
    if metadata_offset.saturating_add(LENGTH_PREFIX as u64) > available {
        return true;
    }
    match read_u32_at(data, start + metadata_offset as usize) {
        Ok(len) => metadata_offset + LENGTH_PREFIX as u64 + len as u64 > available,
        Err(_) => true,
    }
}

/// Outcome of decoding one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub size: usize,
    pub events: u64,
    pub skipped: u64,
    pub checkpoints: usize,
    pub constants: usize,
}

/// Decode one complete chunk, forwarding events to sinks from `factory`
pub fn parse_chunk(
    chunk: &[u8],
    factory: &mut dyn EventSinkFactory,
    options: ParserOptions,
) -> Result<ChunkStats> {
    let header = ChunkHeader::read(chunk, 0)?;
    if header.size != chunk.len() {
        return Err(RecordingError::format(format!(
            "chunk of {} bytes declares size {}",
            chunk.len(),
            header.size
        )));
    }

    let metadata = ChunkMetadata::read(chunk, header.metadata_offset)?;
    let (constants, checkpoints) = load_constants(chunk, header.metadata_offset, &metadata)?;

    let mut dispatcher = EventDispatcher::new(&metadata, options)?;
    let mut events = 0;
    let mut position = BODY_START;
    while position < header.metadata_offset {
        let mut record = Offset::new(chunk, position)?;
        if record.limit() > header.metadata_offset {
            return Err(RecordingError::format(format!(
                "record at {} overlaps the metadata record at {}",
                position, header.metadata_offset
            )));
        }

        let type_id = record.read_u64()?;
        match type_id {
            EVENT_METADATA | EVENT_CHECKPOINT => record.skip_to_end(),
            _ => {
                if dispatcher.dispatch(&mut record, type_id, &constants, &metadata, factory)? {
                    events += 1;
                }
            }
        }

        if record.remaining() > 0 {
            trace!(
                "Record at {} left {} trailing bytes",
                position,
                record.remaining()
            );
        }
        position = record.limit();
    }

    let stats = ChunkStats {
        size: chunk.len(),
        events,
        skipped: dispatcher.skipped(),
        checkpoints,
        constants: constants.len(),
    };
    debug!(
        "Parsed chunk: {} bytes, {} events, {} checkpoints, {} constants",
        stats.size, stats.events, stats.checkpoints, stats.constants
    );
    Ok(stats)
}

/// Walk the checkpoint chain and load every constant pool entry
pub fn load_constants(
    chunk: &[u8],
    metadata_offset: usize,
    metadata: &ChunkMetadata,
) -> Result<(ConstantPools, usize)> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = metadata.previous_checkpoint();

    while next != 0 {
        let at = usize::try_from(next).unwrap_or(usize::MAX);
        if at < BODY_START || at >= metadata_offset {
            return Err(RecordingError::format(format!(
                "checkpoint backlink {} outside chunk body",
                next
            )));
        }
        if !seen.insert(at) {
            return Err(RecordingError::format(format!(
                "checkpoint chain loops back to {}",
                at
            )));
        }

        let mut record = Offset::new(chunk, at)?;
        let type_id = record.read_u64()?;
        if type_id != EVENT_CHECKPOINT {
            return Err(RecordingError::format(format!(
                "backlink {} points at record type {}, not a checkpoint",
                at, type_id
            )));
        }
        chain.push(at);
        next = record.read_u64()?;
    }

    let mut pools = ConstantPools::for_metadata(metadata);
    let mut readers: HashMap<u64, StructReader> = HashMap::new();
    let basis = metadata.time_basis();
    let ctx = ReadContext {
        basis,
        constants: None,
        at: 0,
    };

    // Oldest checkpoint first
    for &at in chain.iter().rev() {
        let mut record = Offset::new(chunk, at)?;
        record.read_u64()?;
        record.read_u64()?;
        let timestamp = basis.ticks_to_nanos(record.read_i64()?);

        let pool_count = record.read_len()?;
        for _ in 0..pool_count {
            let content = record.read_u64()?;
            let reader = match readers.entry(content) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let descriptor = metadata.content_type(content).ok_or_else(|| {
                        RecordingError::format(format!(
                            "checkpoint at {} holds content type {} which has no descriptor",
                            at, content
                        ))
                    })?;
                    entry.insert(StructReader::for_content_type(descriptor, metadata)?)
                }
            };

            let count = record.read_len()?;
            for _ in 0..count {
                let id = record.read_u64()?;
                let value = reader.read(&mut record, &ctx)?;
                pools.put(content, id, value, timestamp);
            }
        }
    }

    pools.set_load_done();
    Ok((pools, chain.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bounds() {
        // metadata offset 8, metadata length 2 -> size 14
        let mut chunk = vec![0, 0, 0, 0, 0, 0, 0, 8];
        chunk.extend_from_slice(&[0, 0, 0, 2, 0, 0]);
        let header = ChunkHeader::read(&chunk, 0).unwrap();
        assert_eq!(header.metadata_offset, 8);
        assert_eq!(header.size, 14);

        chunk.truncate(13);
        assert!(ChunkHeader::read(&chunk, 0).is_err());
    }

    #[test]
    fn test_metadata_offset_inside_header_rejected() {
        let chunk = vec![0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0];
        assert!(ChunkHeader::read(&chunk, 0).is_err());
    }

    #[test]
    fn test_split_back_to_back_chunks() {
        let mut chunk = vec![0, 0, 0, 0, 0, 0, 0, 8];
        chunk.extend_from_slice(&[0, 0, 0, 1, 0]);
        let mut stream = chunk.clone();
        stream.extend_from_slice(&chunk);

        let chunks = split_chunks(&stream).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], &chunk[..]);

        stream.push(0);
        assert!(split_chunks(&stream).is_err());
    }

    #[test]
    fn test_truncated_tail_dropped_on_request() {
        let mut chunk = vec![0, 0, 0, 0, 0, 0, 0, 8];
        chunk.extend_from_slice(&[0, 0, 0, 1, 0]);
        let mut stream = chunk.clone();
        stream.extend_from_slice(&chunk[..10]);

        assert!(split_chunks(&stream).is_err());
        let (chunks, dropped) = split_chunks_with(&stream, true).unwrap();
        assert_eq!(chunks, vec![&chunk[..]]);
        assert_eq!(dropped, 10);

        // only the length prefix of the metadata record is missing its body
        stream.truncate(chunk.len() + 12);
        let (chunks, dropped) = split_chunks_with(&stream, true).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(dropped, 12);
    }

    #[test]
    fn test_corrupt_tail_still_rejected() {
        let mut chunk = vec![0, 0, 0, 0, 0, 0, 0, 8];
        chunk.extend_from_slice(&[0, 0, 0, 1, 0]);
        let mut stream = chunk.clone();
        stream.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0]);

        assert!(split_chunks_with(&stream, true).unwrap_err().is_format_error());
    }
}
