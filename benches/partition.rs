use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use assetlink::{
    Batch, BatchId, CycleId, EquivalencePartitioner, Field, FieldPriorities, MatchEngine, Merger,
    OrgId, Record, RecordKind, Stores,
};

// Every fourth record repeats an earlier address so classes are non-trivial.
fn make_records(org: OrgId, batch: BatchId, len: usize) -> Vec<Record> {
    (0..len)
        .map(|i| {
            let address = if i % 4 == 0 { i / 2 } else { i };
            Record::new(org, batch, RecordKind::Building)
                .with(Field::AddressLine1, format!("{address} Bench Ave"))
                .with(Field::LotNumber, format!("{}", address % 97))
                .with(Field::SiteEui, i as f64)
        })
        .collect()
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");
    let partitioner = EquivalencePartitioner::default_for(RecordKind::Building);
    for len in [1_000usize, 10_000, 50_000] {
        let records = make_records(OrgId::new(), BatchId::new(), len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("sequential", len), &records, |b, records| {
            b.iter(|| black_box(partitioner.partition(records)));
        });
        group.bench_with_input(BenchmarkId::new("parallel_4", len), &records, |b, records| {
            b.iter(|| black_box(partitioner.partition_parallel(records, 4)));
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let records = make_records(OrgId::new(), BatchId::new(), 10_000);
    let merger = Merger::default_for(RecordKind::Building);
    let priorities = FieldPriorities::new();
    c.bench_function("merge/10k", |b| {
        b.iter(|| black_box(merger.merge_all(records.clone(), &priorities).unwrap()));
    });
}

fn bench_match_batch(c: &mut Criterion) {
    c.bench_function("match_batch/5k", |b| {
        b.iter_batched(
            || {
                // Fresh stores per iteration so earlier Views do not leak in.
                let engine = MatchEngine::with_defaults(Stores::in_memory());
                let batch = Batch::new(OrgId::new(), CycleId::new());
                engine.stores().batches.insert(batch.clone()).unwrap();
                for record in make_records(batch.org, batch.id, 5_000) {
                    engine.stores().records.insert(record).unwrap();
                }
                (engine, batch.id)
            },
            |(engine, batch)| black_box(engine.match_batch(batch).unwrap()),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_partition, bench_merge, bench_match_batch);
criterion_main!(benches);
