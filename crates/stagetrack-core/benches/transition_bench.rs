//! # Transition Benchmarks
//!
//! Performance benchmarks for stagetrack-core transitions and persistence.
//!
//! Run with: `cargo bench -p stagetrack-core`

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use stagetrack_core::{
    CompletionReport, MemoryStore, StageCatalog, StageDefinition, StageId, StageMachine,
    WorkflowEngine, WorkflowTracking, tracking_from_json, tracking_to_json,
};
use std::hint::black_box;

/// A linear catalog of `size` stages.
fn linear_catalog(size: u32) -> StageCatalog {
    let stages = (1..=size)
        .map(|id| StageDefinition {
            id: StageId(id),
            name: format!("stage {}", id),
            description: String::new(),
            prerequisites: if id == 1 {
                Default::default()
            } else {
                [StageId(id - 1)].into_iter().collect()
            },
            expected_outputs: vec![format!("out-{}.md", id)],
            validation_criteria: vec!["done".to_string()],
        })
        .collect();
    StageCatalog::new(stages).expect("catalog")
}

/// A record with every stage but the last completed.
fn nearly_done(catalog: &StageCatalog) -> WorkflowTracking {
    let machine = StageMachine::new(catalog);
    let now = Utc::now();
    let mut tracking = machine.start("bench", now);
    for id in 1..catalog.last_id().value() {
        machine
            .complete(
                &mut tracking,
                StageId(id),
                CompletionReport::new().with_output("artifact.md"),
                now,
            )
            .expect("complete");
    }
    tracking
}

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_run");

    for size in [8u32, 32, 64].iter() {
        let catalog = linear_catalog(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let tracking = nearly_done(&catalog);
                black_box(tracking)
            });
        });
    }

    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollback");

    for size in [8u32, 32, 64].iter() {
        let catalog = linear_catalog(*size);
        let machine = StageMachine::new(&catalog);
        let base = nearly_done(&catalog);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut tracking = base.clone();
                machine
                    .rollback(&mut tracking, StageId(1), None, Utc::now())
                    .expect("rollback");
                black_box(tracking)
            });
        });
    }

    group.finish();
}

fn bench_readiness(c: &mut Criterion) {
    let catalog = StageCatalog::standard();
    let machine = StageMachine::new(&catalog);
    let tracking = nearly_done(&catalog);

    c.bench_function("check_readiness", |b| {
        b.iter(|| black_box(machine.check_readiness(&tracking, StageId(8)).is_ok()));
    });
}

fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    let catalog = StageCatalog::standard();
    let tracking = nearly_done(&catalog);
    let bytes = tracking_to_json(&tracking).expect("serialize");

    group.bench_function("to_json", |b| {
        b.iter(|| black_box(tracking_to_json(&tracking).expect("serialize")));
    });
    group.bench_function("from_json", |b| {
        b.iter(|| black_box(tracking_from_json(&bytes).expect("deserialize")));
    });

    group.finish();
}

fn bench_engine_cycle(c: &mut Criterion) {
    c.bench_function("engine_init_complete_memory", |b| {
        b.iter(|| {
            let mut engine = WorkflowEngine::new(MemoryStore::new(), StageCatalog::standard());
            let now = Utc::now();
            engine.init("bench", now).expect("init");
            engine
                .complete("bench", StageId(1), CompletionReport::new(), now)
                .expect("complete");
            black_box(engine)
        });
    });
}

criterion_group!(
    benches,
    bench_full_run,
    bench_rollback,
    bench_readiness,
    bench_persistence,
    bench_engine_cycle,
);
criterion_main!(benches);
