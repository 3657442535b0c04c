// benches/parser_bench.rs
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flightrec::parser::{read_chunk_metadata, split_chunks};
use flightrec::recording::{Builtin, CompressionLevel};
use flightrec::{load_events, RecorderConfig, Recording};

fn build_recording(events: usize, compression: Option<CompressionLevel>) -> Vec<u8> {
    let mut config = RecorderConfig::default().with_start_time_nanos(1_700_000_000_000_000_000);
    if let Some(level) = compression {
        config = config.with_compression(level);
    }
    let recording = Recording::in_memory(config).unwrap();
    let ty = recording
        .register_event_type("bench.Request", |b| {
            b.add_field("path", Builtin::Text)
                .add_field("status", Builtin::Int)
                .add_field("latency", Builtin::Double);
        })
        .unwrap();

    for i in 0..events {
        recording
            .write_event(&ty, |e| {
                e.put("path", format!("/items/{}", i % 32))
                    .put("status", 200i32)
                    .put("latency", i as f64 * 0.5);
            })
            .unwrap();
    }
    recording.finish().unwrap()
}

fn benchmark_load_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_events");

    for &events in [1_000usize, 10_000].iter() {
        let data = build_recording(events, None);
        group.throughput(Throughput::Elements(events as u64));
        group.bench_with_input(BenchmarkId::new("plain", events), &data, |b, data| {
            b.iter(|| black_box(load_events(data).unwrap()));
        });

        let compressed = build_recording(events, Some(CompressionLevel::Fast));
        group.bench_with_input(BenchmarkId::new("zstd", events), &compressed, |b, data| {
            b.iter(|| black_box(load_events(data).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_metadata(c: &mut Criterion) {
    let data = build_recording(1_000, None);

    c.bench_function("read_chunk_metadata", |b| {
        b.iter(|| black_box(read_chunk_metadata(&data).unwrap()));
    });

    c.bench_function("split_chunks", |b| {
        b.iter(|| black_box(split_chunks(&data[4..]).unwrap().len()));
    });
}

criterion_group!(benches, benchmark_load_events, benchmark_metadata);
criterion_main!(benches);
