//! Event log and replay benchmarks.
//!
//! Run with:
//! ```sh
//! cargo bench --bench log
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use echoes_core::{
    EventIdentifier, EventLog, History, ProjectionError, SequenceNumber, SiteIdentifier,
    TwoWayProjection,
};

const SIZES: [u32; 3] = [1_000, 10_000, 50_000];

fn seq(n: u32) -> SequenceNumber {
    SequenceNumber::new(n).unwrap_or(SequenceNumber::MAX)
}

fn site(n: u32) -> SiteIdentifier {
    SiteIdentifier::new(n).unwrap_or(SiteIdentifier::MIN)
}

/// Running byte total; cheap enough that replay cost dominates.
#[derive(Debug, Clone, Copy)]
struct ByteCount;

impl TwoWayProjection for ByteCount {
    type Model = u64;
    type Change = u64;

    fn forward(
        &self,
        model: &mut u64,
        _id: EventIdentifier,
        payload: &[u8],
    ) -> Result<u64, ProjectionError> {
        let added = payload.iter().map(|&b| u64::from(b)).sum();
        *model += added;
        Ok(added)
    }

    fn backward(&self, model: &mut u64, _id: EventIdentifier, _payload: &[u8], added: u64) {
        *model -= added;
    }
}

fn bench_tail_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log.append");
    for size in SIZES {
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut log = EventLog::new();
                for n in 0..size {
                    let _ = log.insert(seq(n), site(1 + n % 4), b"payload");
                }
                black_box(log.len())
            });
        });
    }
    group.finish();
}

/// Late arrivals a few positions behind the tail, the common shape of
/// concurrent edits arriving over a network.
fn bench_clustered_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("log.clustered");
    for size in SIZES {
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut log = EventLog::new();
                for n in 0..size {
                    let _ = log.insert(seq(n), site(1), b"local");
                    if n >= 8 {
                        let _ = log.insert(seq(n - 8), site(2), b"remote");
                    }
                }
                black_box(log.len())
            });
        });
    }
    group.finish();
}

fn bench_history_out_of_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("history.out_of_order");
    for size in [1_000_u32, 10_000] {
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut history = History::new(ByteCount, 0);
                for n in 0..size {
                    let _ = history.insert(seq(n), site(1), b"a");
                    if n >= 4 {
                        let _ = history.insert(seq(n - 4), site(2), b"b");
                    }
                }
                black_box(*history.model())
            });
        });
    }
    group.finish();
}

fn bench_site_scan(c: &mut Criterion) {
    let mut log = EventLog::new();
    for n in 0..50_000 {
        let _ = log.insert(seq(n), site(1 + n % 8), b"payload");
    }
    c.bench_function("log.events_of", |b| {
        b.iter(|| black_box(log.events_of_from(site(3), seq(25_000)).count()));
    });
}

criterion_group!(
    benches,
    bench_tail_append,
    bench_clustered_inserts,
    bench_history_out_of_order,
    bench_site_scan
);
criterion_main!(benches);
