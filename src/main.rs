// src/main.rs
//! flightrec command line tool
//!
//! Inspect recordings and produce demo recordings.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flightrec::observability::{describe_metrics, init_tracing};
use flightrec::parser::{parse_recording, read_chunk_metadata, EventCollector, ExportFormat, Exporter};
use flightrec::recording::{Builtin, CompressionLevel};
use flightrec::{ParserOptions, RecorderConfig, Recording};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "flightrec")]
#[command(about = "Read and write chunked binary event recordings", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./flightrec.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show chunk, type and event counts of a recording.
    Summary {
        file: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Print decoded events.
    Print {
        file: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Only events of this type
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,
        /// Maximum number of events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Skip records of undeclared event types instead of failing
        #[arg(long)]
        lenient: bool,
        /// Keep the complete chunks of a recording that was cut off
        #[arg(long)]
        ignore_truncated: bool,
        /// Decode chunks on several threads
        #[arg(long)]
        parallel: bool,
    },

    /// Write a demo recording from several threads.
    Demo {
        out: PathBuf,
        /// Events per thread
        #[arg(short = 'n', long, default_value_t = 1000)]
        events: usize,
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Compress the recording
        #[arg(long, value_enum)]
        compress: Option<Level>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Jsonl,
    Text,
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    Fast,
    Balanced,
    Best,
}

impl From<Level> for CompressionLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Fast => CompressionLevel::Fast,
            Level::Balanced => CompressionLevel::Balanced,
            Level::Best => CompressionLevel::Best,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging.filter, config.logging.json)?;
    describe_metrics();

    info!("flightrec v{} ({})", flightrec::VERSION, flightrec::GIT_HASH);

    match cli.command {
        Command::Summary { file, json } => summary(&file, json),
        Command::Print {
            file,
            format,
            event_type,
            limit,
            lenient,
            ignore_truncated,
            parallel,
        } => {
            let options = ParserOptions {
                skip_unknown_event_types: lenient,
                ignore_truncated_chunk: ignore_truncated,
                parallel_chunks: parallel,
            };
            print(&file, format, event_type, limit, options)
        }
        Command::Demo {
            out,
            events,
            threads,
            compress,
        } => {
            let mut config = config;
            if let Some(level) = compress {
                config = config.with_compression(level.into());
            }
            demo(&out, config, events, threads)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RecorderConfig> {
    match path {
        Some(path) => RecorderConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RecorderConfig::load().unwrap_or_else(|e| {
            warn!("Falling back to default configuration: {}", e);
            RecorderConfig::default()
        })),
    }
}

fn read(file: &Path) -> Result<Vec<u8>> {
    std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn summary(file: &Path, json: bool) -> Result<()> {
    let data = read(file)?;
    let mut collector = EventCollector::new();
    let summary = parse_recording(&data, &mut collector, ParserOptions::default())?;
    let collection = collector.into_collection();
    let chunks = read_chunk_metadata(&data)?;

    if json {
        let types: Vec<_> = collection
            .types()
            .iter()
            .map(|t| serde_json::json!({ "type": t.identifier, "events": t.len() }))
            .collect();
        let producers: Vec<_> = chunks
            .iter()
            .flat_map(|c| c.producers().iter().map(|p| p.name.clone()))
            .collect();
        let doc = serde_json::json!({
            "chunks": summary.chunks,
            "events": summary.events,
            "skipped": summary.skipped,
            "constants": summary.constants,
            "bytes": summary.bytes,
            "compressed": summary.compressed,
            "producers": producers,
            "types": types,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", file.display());
    println!(
        "  {} chunks, {} events, {} constants, {} bytes{}",
        summary.chunks,
        summary.events,
        summary.constants,
        summary.bytes,
        if summary.compressed { " (zstd)" } else { "" }
    );
    for (index, chunk) in chunks.iter().enumerate() {
        let duration_ms = (chunk.end_time_nanos() - chunk.start_time_nanos()) / 1_000_000;
        println!("  chunk {}: {} ms", index, duration_ms);
    }
    for t in collection.types() {
        println!("  {:<40} {:>10}", t.identifier, t.len());
    }
    Ok(())
}

fn print(
    file: &Path,
    format: OutputFormat,
    event_type: Option<String>,
    limit: Option<usize>,
    options: ParserOptions,
) -> Result<()> {
    let collection = flightrec::load_file(file, options)?;

    let format = match format {
        OutputFormat::Json => ExportFormat::Json,
        OutputFormat::Jsonl => ExportFormat::JsonLines,
        OutputFormat::Text => ExportFormat::Text,
    };
    let mut exporter = Exporter::new(format);
    if let Some(event_type) = event_type {
        exporter = exporter.with_type_filter(event_type);
    }
    if let Some(limit) = limit {
        exporter = exporter.with_limit(limit);
    }

    println!("{}", exporter.export(&collection)?);
    Ok(())
}

fn demo(out: &Path, config: RecorderConfig, events: usize, threads: usize) -> Result<()> {
    let recording = Arc::new(Recording::to_file(out, config)?);
    let request = recording.register_event_type("demo.Request", |b| {
        b.add_field("path", Builtin::Text)
            .add_field("status", Builtin::Int)
            .add_field_with("bytes", Builtin::Long, |f| {
                f.add_annotation(flightrec::recording::types::names::DATA_AMOUNT, Some("BYTES"));
            });
    })?;

    let handles: Vec<_> = (0..threads.max(1))
        .map(|worker| {
            let recording = Arc::clone(&recording);
            let request = Arc::clone(&request);
            std::thread::Builder::new()
                .name(format!("demo-worker-{}", worker))
                .spawn(move || -> flightrec::Result<()> {
                    for i in 0..events {
                        recording.write_event(&request, |e| {
                            e.put("path", format!("/items/{}", i % 16))
                                .put("status", if i % 10 == 0 { 500i32 } else { 200i32 })
                                .put("bytes", (i * 64) as i64);
                        })?;
                    }
                    Ok(())
                })
        })
        .collect::<std::io::Result<_>>()
        .context("Failed to spawn demo workers")?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("demo worker panicked"))??;
    }

    let stats = recording.stats();
    recording.close()?;
    println!(
        "Wrote {} events ({} bytes of records) to {}",
        stats.events_written,
        stats.bytes_written,
        out.display()
    );
    Ok(())
}
