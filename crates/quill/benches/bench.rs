use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use quill::{
    IdGenStatus, MemoryCounterStore, MemoryViewStore, RateLimiter, SnowflakeGenerator,
    SystemClock, TimeSource, ViewCache,
};
use std::{sync::Arc, thread::scope, time::Duration, time::Instant};
use tokio::runtime::Builder;

struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration; one full sequence.
const TOTAL_IDS: usize = 4096;

/// Hot path where every poll is `Ready`.
fn bench_generator_hot(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator/hot");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator = SnowflakeGenerator::new(0, FixedMockTime { millis: 1 }).unwrap();
                for _ in 0..TOTAL_IDS {
                    match generator.try_poll_id() {
                        Ok(IdGenStatus::Ready { id }) => {
                            black_box(id);
                        }
                        _ => unreachable!(),
                    }
                }
            }
            start.elapsed()
        });
    });
    group.finish();
}

/// Real clock, including waits once a millisecond's sequence is exhausted.
fn bench_generator_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator/contended");
    for threads in [1, 2, 4, 8] {
        group.throughput(Throughput::Elements((TOTAL_IDS * threads) as u64));
        group.bench_function(format!("threads/{threads}"), |b| {
            let generator = SnowflakeGenerator::new(1, SystemClock::default()).unwrap();
            b.iter(|| {
                scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for _ in 0..TOTAL_IDS {
                                black_box(generator.next_id().unwrap());
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_view_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("views");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function("record/same-id", |b| {
        let cache = ViewCache::new();
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                cache.record(black_box("post-1"));
            }
        });
    });

    let ids: Vec<String> = (0..256).map(|i| format!("post-{i}")).collect();
    group.bench_function("record+flush/256-ids", |b| {
        let rt = Builder::new_current_thread().build().unwrap();
        let cache = Arc::new(ViewCache::new());
        let sink = MemoryViewStore::new();
        b.to_async(&rt).iter(|| {
            let cache = Arc::clone(&cache);
            let sink = sink.clone();
            let ids = &ids;
            async move {
                for i in 0..TOTAL_IDS {
                    cache.record(&ids[i % ids.len()]);
                }
                black_box(cache.flush_all(&sink).await);
            }
        });
    });
    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limit");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function("memory/check", |b| {
        let rt = Builder::new_current_thread().enable_time().build().unwrap();
        let limiter = RateLimiter::new(MemoryCounterStore::new());
        b.to_async(&rt).iter(|| async {
            for i in 0..TOTAL_IDS {
                let subject = if i % 2 == 0 { "10.0.0.1" } else { "10.0.0.2" };
                let _ = black_box(
                    limiter
                        .rate_limit(subject, "/api/posts", Duration::from_secs(60), u64::MAX)
                        .await,
                );
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_generator_hot,
    bench_generator_contended,
    bench_view_cache,
    bench_rate_limiter
);
criterion_main!(benches);
