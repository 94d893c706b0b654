//! Throughput benchmarks for graphcast.
//!
//! These benchmarks measure the cost of membership changes and fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphcast_bench::{join_discarding, runtime, DiscardSink};
use graphcast_core::Hub;

/// Benchmark join and leave.
fn bench_membership(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("membership");

    group.bench_function("join_leave_same_channel", |b| {
        let hub = Hub::new();
        let _anchor = join_discarding(&hub, "graph", 1);
        b.iter(|| {
            let handle = hub.join(black_box("graph"), DiscardSink).unwrap();
            hub.leave(&handle)
        });
    });

    group.bench_function("join_leave_fresh_channel", |b| {
        let hub = Hub::new();
        let mut i = 0u64;
        b.iter(|| {
            let channel = format!("graph:{}", i);
            i += 1;
            let handle = hub.join(&channel, DiscardSink).unwrap();
            hub.leave(&handle)
        });
    });

    group.finish();
}

/// Benchmark publish to a channel of growing size.
fn bench_fanout(c: &mut Criterion) {
    let rt = runtime();
    let _guard = rt.enter();
    let mut group = c.benchmark_group("fanout");

    for size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let hub = Hub::new();
            let _members = join_discarding(&hub, "broadcast", size);
            let payload = bytes::Bytes::from(vec![0u8; 64]);

            b.iter(|| hub.publish("broadcast", black_box(payload.clone())));
        });
    }

    group.finish();
}

/// Benchmark publish to channels nobody joined.
fn bench_publish_unknown(c: &mut Criterion) {
    let hub = Hub::new();
    c.bench_function("publish_unknown_channel", |b| {
        b.iter(|| hub.publish(black_box("nobody"), black_box("payload")))
    });
}

criterion_group!(benches, bench_membership, bench_fanout, bench_publish_unknown);
criterion_main!(benches);
