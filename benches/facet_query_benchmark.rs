// Facet query performance benchmarks
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use facet_engine::facets::{
    Aggregator, Encoder, FacetConfig, FacetService, Filter, Record, RecordId, TokenCounts,
};
use tokio::runtime::Runtime;

const STATES: [&str; 8] = ["CA", "TX", "NY", "WA", "FL", "OR", "NV", "AZ"];
const SELLERS: [&str; 4] = ["agent", "owner", "bank", "builder"];

fn listings(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(RecordId::new())
                .with_field("state", STATES[i % STATES.len()])
                .with_field("seller", SELLERS[(i / 3) % SELLERS.len()])
                .with_field("beds", ((i % 5) + 1) as i64)
                .with_field("zip", format!("{:05}", (i * 37) % 2000))
        })
        .collect()
}

fn facet_queries(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("facet_query");

    for size in [1_000usize, 10_000, 50_000].iter() {
        let service = rt.block_on(async {
            let service = FacetService::new(FacetConfig::default()).await.unwrap();
            service.ingest_batch(&listings(*size)).await.unwrap();
            service
        });

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("full_scan", size), size, |b, _| {
            b.to_async(&rt)
                .iter(|| async { service.search(black_box(&Filter::new()), Some(10)).await.unwrap() });
        });

        let filter = Filter::new().with("state", "CA").with("seller", "agent");
        group.bench_with_input(BenchmarkId::new("filtered", size), size, |b, _| {
            b.to_async(&rt)
                .iter(|| async { service.search(black_box(&filter), Some(10)).await.unwrap() });
        });
    }
    group.finish();
}

fn ranking(c: &mut Criterion) {
    let encoder = Encoder::default();
    let mut counts = TokenCounts::new();
    for field in 0..32 {
        for value in 0..2_000u64 {
            let token = encoder
                .encode_str(&format!("field{}", field), &format!("v{}", value))
                .unwrap();
            counts.insert(token, (value * 7919) % 1_000);
        }
    }

    let mut group = c.benchmark_group("ranking");
    for (name, parallel) in [("sequential", false), ("parallel", true)] {
        let aggregator = Aggregator::new(parallel);
        group.bench_function(name, |b| {
            b.iter(|| aggregator.rank_top_k(black_box(&counts), Some(10)));
        });
    }
    group.finish();
}

fn encoding(c: &mut Criterion) {
    let encoder = Encoder::default();
    let record = Record::new(RecordId::new())
        .with_field("state", "CA")
        .with_field("url:host", "example.com:8080")
        .with_field("beds", 3i64)
        .with_field("pool", true);

    c.bench_function("encode_record", |b| {
        b.iter(|| encoder.encode_record(black_box(&record.fields)).unwrap());
    });
}

criterion_group!(benches, facet_queries, ranking, encoding);
criterion_main!(benches);
