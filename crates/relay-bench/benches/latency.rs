//! Latency benchmarks for relay.
//!
//! These benchmarks time a single inbound message from raw bytes to the
//! frames queued for delivery.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_core::{Dispatcher, DispatcherConfig, ManualClock};
use relay_protocol::{codec, ClientFrame};
use relay_transport::{Connection, OutboundQueue, QueuedConnection};
use std::sync::Arc;
use std::time::Instant;

fn dispatcher() -> Dispatcher {
    Dispatcher::with_clock(DispatcherConfig::default(), Arc::new(ManualClock::new(0)))
}

fn connect(dispatcher: &Dispatcher, id: &str) -> (Arc<QueuedConnection>, OutboundQueue) {
    let (conn, rx) = QueuedConnection::new(id.into());
    let conn = Arc::new(conn);
    dispatcher.connect(conn.clone());
    (conn, rx)
}

fn request(frame: ClientFrame) -> Vec<u8> {
    codec::encode_request(&frame).unwrap().into_bytes()
}

/// Benchmark publish from raw bytes to the subscriber's queue.
fn bench_publish_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_latency");

    for subscribers in [1usize, 10] {
        group.bench_function(format!("{}_subscribers", subscribers), |b| {
            b.iter_custom(|iters| {
                let dispatcher = dispatcher();
                let (publisher, _publisher_rx) = connect(&dispatcher, "publisher");
                let mut queues: Vec<_> = (0..subscribers)
                    .map(|i| {
                        let (conn, rx) = connect(&dispatcher, &format!("conn-{}", i));
                        dispatcher.registry().subscribe(conn.id(), "test");
                        rx
                    })
                    .collect();
                let publish = request(ClientFrame::publish("test", serde_json::json!({"n": 1})));

                let start = Instant::now();
                for _ in 0..iters {
                    dispatcher.handle(&*publisher, black_box(&publish));
                    for rx in &mut queues {
                        let _ = rx.try_recv();
                    }
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Benchmark a check_online request until its reply is queued.
fn bench_check_online_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_online_latency");

    group.bench_function("3_players", |b| {
        b.iter_custom(|iters| {
            let dispatcher = dispatcher();
            let (conn, mut rx) = connect(&dispatcher, "asker");
            dispatcher.handle(&*conn, &request(ClientFrame::ping("p1")));
            let query = request(ClientFrame::check_online(["p1", "p2", "p3"]));

            let start = Instant::now();
            for _ in 0..iters {
                dispatcher.handle(&*conn, black_box(&query));
                let _ = rx.try_recv();
            }
            start.elapsed()
        });
    });

    group.bench_function("heartbeat", |b| {
        let dispatcher = dispatcher();
        let (conn, _rx) = connect(&dispatcher, "pinger");
        let ping = br#"{"action":"ping","payload":"{\"Address\":\"p1\"}"}"#;

        b.iter(|| dispatcher.handle(&*conn, black_box(ping)));
    });

    group.finish();
}

/// Benchmark disconnect teardown of a connection with many subscriptions.
fn bench_teardown(c: &mut Criterion) {
    let mut group = c.benchmark_group("teardown");

    group.bench_function("100_channels", |b| {
        b.iter_batched(
            || {
                let dispatcher = dispatcher();
                let (conn, rx) = connect(&dispatcher, "conn");
                for i in 0..100 {
                    dispatcher
                        .registry()
                        .subscribe(conn.id(), &format!("channel:{}", i));
                }
                (dispatcher, conn, rx)
            },
            |(dispatcher, conn, _rx)| dispatcher.disconnect(conn.id()),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark subscription lookup.
fn bench_subscription_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscription_lookup");

    // Setup: 1000 channels with 10 subscribers each
    let dispatcher = dispatcher();
    let mut queues = Vec::new();
    for j in 0..10 {
        let (conn, rx) = connect(&dispatcher, &format!("conn:{}", j));
        for i in 0..1000 {
            dispatcher
                .registry()
                .subscribe(conn.id(), &format!("channel:{}", i));
        }
        queues.push(rx);
    }
    let registry = dispatcher.registry();

    group.bench_function("channel_exists", |b| {
        let mut i = 0;
        b.iter(|| {
            let channel = format!("channel:{}", i % 1000);
            i += 1;
            registry.channel_exists(black_box(&channel))
        });
    });

    group.bench_function("subscriber_count", |b| {
        let mut i = 0;
        b.iter(|| {
            let channel = format!("channel:{}", i % 1000);
            i += 1;
            registry.subscriber_count(black_box(&channel))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_latency,
    bench_check_online_latency,
    bench_teardown,
    bench_subscription_lookup,
);
criterion_main!(benches);
