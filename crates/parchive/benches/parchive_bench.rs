//! Benchmarks for parameter archive components.
//!
//! Run with: cargo bench --package alopex-parchive
//!
//! ## Benchmark Categories
//!
//! - **Codec**: Encode/decode of order-preserving column values
//! - **Merge**: k-way merge of sorted tuple sources
//! - **Writer**: Columnar segment writes into the in-memory store

use alopex_parchive::codec::{ColumnValue, HresInstant};
use alopex_parchive::merge::MergeExpression;
use alopex_parchive::segment::{SegmentClock, SegmentInterval};
use alopex_parchive::tuple::{collect, Tuple, VecSource};
use alopex_parchive::writer::{ColumnarSegmentWriter, MemorySegmentStore, SegmentWriter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

/// Generate a mix of column values of every type.
fn generate_values(count: usize) -> Vec<ColumnValue> {
    (0..count)
        .map(|i| match i % 5 {
            0 => ColumnValue::Short(i as i16),
            1 => ColumnValue::Int(-(i as i32)),
            2 => ColumnValue::Long(i as i64 * 1_000),
            3 => ColumnValue::Double(i as f64 * 0.25 - 100.0),
            _ => ColumnValue::HresTimestamp(HresInstant::from_millis(i as i64)),
        })
        .collect()
}

/// Generate `streams` interleaved sorted streams of `per_stream` tuples each.
fn generate_streams(streams: usize, per_stream: usize) -> Vec<Vec<Tuple>> {
    (0..streams)
        .map(|s| {
            (0..per_stream)
                .map(|i| {
                    Tuple::new()
                        .with("gentime", ColumnValue::Long((i * streams + s) as i64))
                        .with("value", ColumnValue::Double(i as f64))
                })
                .collect()
        })
        .collect()
}

fn bench_codec_encode(c: &mut Criterion) {
    let values = generate_values(10_000);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(values.len() as u64));
    group.bench_function("encode_10k", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(values.len() * 12);
            for value in &values {
                value.serialize(&mut buf).unwrap();
            }
            black_box(buf)
        })
    });
    group.finish();
}

fn bench_codec_decode(c: &mut Criterion) {
    let values = generate_values(10_000);
    let encoded: Vec<_> = values
        .iter()
        .map(|v| (v.column_type(), v.to_byte_array()))
        .collect();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(values.len() as u64));
    group.bench_function("decode_10k", |b| {
        b.iter(|| {
            for (ty, bytes) in &encoded {
                black_box(ColumnValue::from_byte_array(*ty, bytes).unwrap());
            }
        })
    });
    group.finish();
}

fn bench_merge_streams(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("merge");

    for streams in [2usize, 4, 16].iter() {
        let inputs = generate_streams(*streams, 10_000 / streams);
        group.throughput(Throughput::Elements((inputs.len() * inputs[0].len()) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(streams), &inputs, |b, inputs| {
            b.iter_batched(
                || inputs.clone(),
                |inputs| {
                    runtime.block_on(async {
                        let mut expr = MergeExpression::new("gentime");
                        for tuples in inputs {
                            expr.add_source(Box::new(VecSource::new(tuples)));
                        }
                        let mut merged = expr.execute().unwrap();
                        black_box(collect(&mut merged).await.unwrap())
                    })
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_columnar_writer(c: &mut Criterion) {
    let clock = SegmentClock::new(1_000).unwrap();
    let tuples: Vec<Tuple> = generate_streams(1, 10_000).remove(0);

    c.bench_function("columnar_writer_10k", |b| {
        b.iter(|| {
            let store = Arc::new(MemorySegmentStore::new());
            let mut writer = ColumnarSegmentWriter::new(
                store.clone(),
                clock,
                SegmentInterval::new(0, 10_000),
                "gentime",
                5_000,
            );
            for tuple in &tuples {
                writer.accept(tuple).unwrap();
            }
            writer.flush().unwrap();
            black_box(store.len())
        })
    });
}

criterion_group!(
    benches,
    // Codec
    bench_codec_encode,
    bench_codec_decode,
    // Merge
    bench_merge_streams,
    // Writer
    bench_columnar_writer,
);
criterion_main!(benches);
