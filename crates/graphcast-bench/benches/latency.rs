//! Latency benchmarks for graphcast.
//!
//! These benchmarks measure publish-to-sink latency through the delivery loop.

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use graphcast_bench::runtime;
use graphcast_core::Hub;
use std::time::Instant;
use tokio::sync::mpsc;

/// Benchmark publish + delivery to in-process sinks.
fn bench_pubsub_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pubsub_latency");

    for members in [1usize, 10] {
        group.bench_function(format!("{}_members", members), |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let hub = Hub::new();
                    let mut receivers = Vec::with_capacity(members);
                    let mut handles = Vec::with_capacity(members);
                    for _ in 0..members {
                        let (tx, rx) = mpsc::channel::<Bytes>(64);
                        handles.push(hub.join("latency", tx).unwrap());
                        receivers.push(rx);
                    }

                    let start = Instant::now();
                    for _ in 0..iters {
                        hub.publish("latency", Bytes::from_static(&[0u8; 64]));
                        for rx in &mut receivers {
                            let _ = rx.recv().await;
                        }
                    }
                    let elapsed = start.elapsed();

                    hub.shutdown();
                    elapsed
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pubsub_latency);
criterion_main!(benches);
