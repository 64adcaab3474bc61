use std::hint::black_box;
use std::io::Cursor;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use worldmodel::{
    initialize, EntityFilter, ImportMode, NewEntity, NewRelationship, StorageConfig,
    TransferOptions, WorldModelStorage,
};

const PROJECTS: usize = 8;

/// Papers spread over projects, each citing the previous one.
fn seeded_store(papers: usize) -> Arc<dyn WorldModelStorage> {
    let storage = initialize(&StorageConfig::in_memory()).unwrap();
    for i in 0..papers {
        storage
            .add_entity(
                NewEntity::new("Paper")
                    .with_id(format!("paper_{i}"))
                    .property("title", format!("Paper {i}"))
                    .project(format!("project_{}", i % PROJECTS))
                    .confidence(0.5 + (i % 50) as f64 / 100.0),
            )
            .unwrap()
            .into_value();
        if i > 0 {
            storage
                .add_relationship(NewRelationship::new(
                    format!("paper_{i}"),
                    format!("paper_{}", i - 1),
                    "CITES",
                ))
                .unwrap()
                .into_value();
        }
    }
    storage
}

fn bench_add_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_model/add_entity");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        let storage = initialize(&StorageConfig::in_memory()).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let id = storage
                .add_entity(
                    NewEntity::new("Paper")
                        .with_id(format!("paper_{i}"))
                        .property("title", "bench")
                        .project("bench"),
                )
                .unwrap()
                .into_value();
            black_box(id);
        });
    });

    group.bench_function("durable_no_fsync", |b| {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            sync_on_write: false,
            ..StorageConfig::at_path(dir.path())
        };
        let storage = initialize(&config).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let id = storage
                .add_entity(NewEntity::new("Paper").with_id(format!("paper_{i}")))
                .unwrap()
                .into_value();
            black_box(id);
        });
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let storage = seeded_store(10_000);
    let mut group = c.benchmark_group("world_model/query");

    let by_project = EntityFilter::new().project("project_3");
    group.bench_function("by_project", |b| {
        b.iter(|| black_box(storage.query(&by_project).unwrap().len()));
    });

    let scan = EntityFilter::new().min_confidence(0.9).limit(100);
    group.bench_function("scan_min_confidence", |b| {
        b.iter(|| black_box(storage.query(&scan).unwrap().len()));
    });

    group.bench_function("statistics", |b| {
        b.iter(|| black_box(storage.get_statistics().unwrap().entity_count));
    });

    group.finish();
}

fn bench_transfer(c: &mut Criterion) {
    let papers = 5_000;
    let storage = seeded_store(papers);
    let mut document = Vec::new();
    storage
        .export_to(&mut document, &TransferOptions::default())
        .unwrap();

    let mut group = c.benchmark_group("world_model/transfer");
    group.throughput(Throughput::Elements((2 * papers - 1) as u64));

    group.bench_function("export", |b| {
        b.iter(|| {
            let mut sink = Vec::with_capacity(document.len());
            storage
                .export_to(&mut sink, &TransferOptions::default())
                .unwrap();
            black_box(sink.len());
        });
    });

    group.bench_function("import_replace", |b| {
        b.iter_batched(
            || initialize(&StorageConfig::in_memory()).unwrap(),
            |target| {
                let summary = target
                    .import_from(
                        &mut Cursor::new(&document),
                        ImportMode::Replace,
                        &TransferOptions::default(),
                    )
                    .unwrap()
                    .into_value();
                black_box(summary.entities_added);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_add_entity, bench_query, bench_transfer);
criterion_main!(benches);
