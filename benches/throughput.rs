#![allow(clippy::unwrap_used)]
//! Throughput benchmarks for inkstream
//!
//! Measures publish, poll-and-ack, and reclaim rates on the in-memory store.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use inkstream::{MemoryLogStore, Message, QueueClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn payload(size: usize) -> Vec<(Bytes, Bytes)> {
    Message::new(vec![b'x'; size])
        .with_header("source", "bench")
        .to_fields()
}

/// Benchmark publish throughput for several payload sizes
fn bench_publish(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_throughput");
    group.throughput(Throughput::Elements(1));

    for size in [64usize, 1024, 16 * 1024] {
        let queue = QueueClient::new(Arc::new(MemoryLogStore::new()));
        let fields = payload(size);
        group.bench_with_input(BenchmarkId::new("publish", size), &size, |b, _| {
            b.to_async(&rt).iter(|| {
                let queue = queue.clone();
                let fields = fields.clone();
                async move {
                    black_box(queue.publish("bench", fields).await.unwrap());
                }
            })
        });
    }

    group.finish();
}

/// Benchmark subscribe + ack round trips with different batch sizes
fn bench_consume(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("consume_throughput");

    for batch in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        let queue = QueueClient::new(Arc::new(MemoryLogStore::new()));
        rt.block_on(queue.create_group("bench", "workers")).unwrap();
        let fields = payload(256);

        group.bench_with_input(BenchmarkId::new("poll_ack", batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| {
                let queue = queue.clone();
                let fields = fields.clone();
                async move {
                    for _ in 0..batch {
                        queue.publish("bench", fields.clone()).await.unwrap();
                    }
                    let delivered = queue.subscribe("bench", "workers", "c1", batch).await.unwrap();
                    let ids: Vec<_> = delivered.iter().map(|d| d.entry.id).collect();
                    black_box(queue.ack_many("bench", "workers", &ids).await.unwrap());
                }
            })
        });
    }

    group.finish();
}

/// Benchmark reclaiming a consumer's pending entries
fn bench_reclaim(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reclaim");
    group.throughput(Throughput::Elements(100));

    let queue = QueueClient::new(Arc::new(MemoryLogStore::new()));
    rt.block_on(async {
        queue.create_group("bench", "workers").await.unwrap();
        for _ in 0..100 {
            queue.publish("bench", payload(128)).await.unwrap();
        }
        queue.subscribe("bench", "workers", "c1", 100).await.unwrap();
    });

    group.bench_function("claim_100_alternating", |b| {
        let mut flip = false;
        b.to_async(&rt).iter(|| {
            flip = !flip;
            let queue = queue.clone();
            let to = if flip { "c2" } else { "c1" };
            async move {
                let claimed = queue
                    .claim_stale("bench", "workers", to, Duration::ZERO, 100)
                    .await
                    .unwrap();
                black_box(claimed.len());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_publish, bench_consume, bench_reclaim);
criterion_main!(benches);
