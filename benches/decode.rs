//! Reply decoding benchmark suite.
//!
//! Benchmarks the hot decode paths at different list sizes:
//! - RESP frame decoding (incremental codec)
//! - Pipe reply classification into geo object lists
//! - Fence message classification
//!
//! Run with: cargo bench --bench decode
//! Results saved to: target/criterion/

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use talon::FenceEvent;
use talon::WireValue;
use talon::protocol::event::LIVE_ACK;
use talon::protocol::response;
use talon::protocol::wire;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const LIST_SIZES: &[usize] = &[10, 100, 1000];

const UPDATE: &str = r#"{"command":"set","group":"5c5203ccf5ec4e4f349fd038","detect":"inside","key":"fleet","time":"2019-01-30T13:06:36.769273-07:00","id":"truck1","object":{"type":"Point","coordinates":[-112.2693,33.5123]},"fields":{"speed":45}}"#;

fn scan_reply(count: usize) -> WireValue {
    let entries = (0..count)
        .map(|i| {
            let point = format!(
                r#"{{"type":"Point","coordinates":[{},{}]}}"#,
                -112.0 - i as f64 * 0.001,
                33.0 + i as f64 * 0.001
            );
            WireValue::Array(vec![WireValue::bulk(format!("truck{i}")), WireValue::bulk(point)])
        })
        .collect();
    WireValue::Array(vec![WireValue::Integer(0), WireValue::Array(entries)])
}

fn encoded(value: &WireValue) -> BytesMut {
    let mut out = BytesMut::new();
    wire::encode(value, &mut out);
    out
}

// ============================================================================
// Benchmark: RESP Frame Decoding
// ============================================================================

fn bench_wire_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_decode");

    for &count in LIST_SIZES {
        let frame = encoded(&scan_reply(count));
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("scan", count), &frame, |b, frame| {
            b.iter(|| {
                let mut buffer = frame.clone();
                black_box(wire::decode(&mut buffer))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Reply Classification
// ============================================================================

fn bench_response_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_decode");

    for &count in LIST_SIZES {
        let reply = scan_reply(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("geo_object_list", count), &reply, |b, reply| {
            b.iter(|| black_box(response::decode(black_box(reply))));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Fence Message Classification
// ============================================================================

fn bench_fence_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("fence_classify");

    group.bench_function("update", |b| {
        b.iter(|| black_box(FenceEvent::classify(black_box(UPDATE))));
    });
    group.bench_function("live_ack", |b| {
        b.iter(|| black_box(FenceEvent::classify(black_box(LIVE_ACK))));
    });
    group.bench_function("garbage", |b| {
        b.iter(|| black_box(FenceEvent::classify(black_box("{\"ok\":false}"))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_wire_decode,
    bench_response_decode,
    bench_fence_classify
);
criterion_main!(benches);
