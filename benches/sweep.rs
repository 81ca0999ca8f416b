// Retry Sweep Benchmarks
//
// Measures the cost of the sweeper's hot paths against the in-memory store.
//
// Key metrics:
// - Due query latency with a large backlog of not-yet-due records
// - Full sweep of a batch of due records with a no-op handler

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use hookwarden::webhooks::store::{DueQuery, MemoryRecordStore, RecordStore};
use hookwarden::webhooks::{
    Clock, DeliveryHandler, EngineSettings, FnHandler, HandlerResponse, ManualClock, NewRecord,
    WebhookEngine, WebhookRecord, WebhookSource,
};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn handler(status: u16) -> Arc<dyn DeliveryHandler> {
    Arc::new(FnHandler::new(move |_record: WebhookRecord| async move {
        Ok::<_, anyhow::Error>(HandlerResponse::with_status(status))
    }))
}

/// Engine holding `count` retrying records, all due once the clock moves a minute
async fn seeded_engine(count: usize) -> (WebhookEngine, ManualClock, Arc<MemoryRecordStore>) {
    let store = Arc::new(MemoryRecordStore::new());
    let clock = ManualClock::new(Utc::now());
    let engine = WebhookEngine::with_clock(
        store.clone(),
        EngineSettings::default(),
        Arc::new(clock.clone()),
    );

    let failing = handler(500);
    for i in 0..count {
        let record = engine
            .create_record(NewRecord::new(
                format!("org-{}", i % 10),
                "payment.completed",
                WebhookSource::Stripe,
                json!({"n": i}),
            ))
            .await
            .unwrap();
        engine.process_now(record.id, failing.clone()).await.unwrap();
    }
    (engine, clock, store)
}

/// Benchmark: due query against a backlog where nothing is due yet
fn bench_due_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("due_query");

    for backlog in [1_000usize, 10_000] {
        let (_engine, clock, store) = rt.block_on(seeded_engine(backlog));
        let now = clock.now();

        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, _| {
            b.iter(|| {
                let due = rt
                    .block_on(store.due(&DueQuery {
                        now,
                        pending_before: now - Duration::seconds(60),
                        limit: 100,
                    }))
                    .unwrap();
                black_box(due);
            });
        });
    }

    group.finish();
}

/// Benchmark: sweeping a batch of due records
fn bench_sweep_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("sweep_batch");
    group.sample_size(20);

    for batch in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || {
                    let (engine, clock, _store) = rt.block_on(seeded_engine(batch));
                    clock.advance(Duration::minutes(1));
                    engine
                },
                |engine| {
                    let processed = rt.block_on(engine.sweep_due(batch, handler(200))).unwrap();
                    black_box(processed);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_due_query, bench_sweep_batch);
criterion_main!(benches);
