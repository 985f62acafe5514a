//! Envelope benchmark suite.
//!
//! Measures the per-message cost paid in the caller's task:
//! - Encode + frame size check for body sizes 64 B .. 60 KiB
//! - Decode of inbound `rec` envelopes
//!
//! Run with: cargo bench --bench envelope
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use eventbus_client::protocol::frame;
use eventbus_client::{Codec, Envelope, JsonCodec, ReplyAddress};
use serde_json::json;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BODY_SIZES: &[usize] = &[64, 1024, 16 * 1024, 60 * 1024];
const MAX_FRAME_SIZE: usize = 65_536;

// ============================================================================
// Benchmark: Encode + Size Check
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_and_check");

    for &size in BODY_SIZES {
        let envelope = Envelope::send("bench.address", json!("x".repeat(size)))
            .with_reply_address(ReplyAddress::generate());

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &envelope, |b, envelope| {
            b.iter(|| {
                let bytes = JsonCodec.encode(black_box(envelope)).expect("encode");
                frame::ensure_fits(&bytes, MAX_FRAME_SIZE).expect("fits");
                bytes
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &size in BODY_SIZES {
        let frame = json!({
            "type": "rec",
            "address": ReplyAddress::generate().as_str(),
            "body": {"payload": "x".repeat(size)},
            "headers": {"tenant": "bench"},
        })
        .to_string()
        .into_bytes();

        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| JsonCodec.decode(black_box(frame)).expect("decode"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
