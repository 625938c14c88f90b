//! Push/pop throughput: reclaiming stack vs epoch stack vs `Mutex<Vec>`.
//!
//! ```bash
//! cargo bench -p lfr-containers --bench stack_throughput
//! ```

use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lfr_containers::{EpochStack, ReclaimingStack};

const OPS_PER_THREAD: u64 = 10_000;

trait BenchStack: Send + Sync + 'static {
    fn make() -> Self;
    fn push(&self, value: u64);
    fn pop(&self) -> Option<u64>;
}

impl BenchStack for ReclaimingStack<u64> {
    fn make() -> Self {
        ReclaimingStack::new()
    }
    fn push(&self, value: u64) {
        ReclaimingStack::push(self, value);
    }
    fn pop(&self) -> Option<u64> {
        ReclaimingStack::pop(self)
    }
}

impl BenchStack for EpochStack<u64> {
    fn make() -> Self {
        EpochStack::new()
    }
    fn push(&self, value: u64) {
        EpochStack::push(self, value);
    }
    fn pop(&self) -> Option<u64> {
        EpochStack::pop(self)
    }
}

struct LockedVec(Mutex<Vec<u64>>);

impl BenchStack for LockedVec {
    fn make() -> Self {
        LockedVec(Mutex::new(Vec::new()))
    }
    fn push(&self, value: u64) {
        self.0.lock().unwrap().push(value);
    }
    fn pop(&self) -> Option<u64> {
        self.0.lock().unwrap().pop()
    }
}

/// Each thread alternates push and pop `OPS_PER_THREAD` times.
fn run_mixed<S: BenchStack>(threads: usize, iters: u64) -> Duration {
    let mut total = Duration::ZERO;
    for _ in 0..iters {
        let stack = Arc::new(S::make());
        let barrier = Arc::new(Barrier::new(threads + 1));
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let stack = Arc::clone(&stack);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..OPS_PER_THREAD {
                        stack.push(t as u64 * OPS_PER_THREAD + i);
                        black_box(stack.pop());
                    }
                })
            })
            .collect();

        barrier.wait();
        let start = Instant::now();
        for h in handles {
            h.join().unwrap();
        }
        total += start.elapsed();
    }
    total
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread_push_pop");
    group.throughput(Throughput::Elements(2));

    let reclaiming = ReclaimingStack::new();
    group.bench_function("reclaiming", |b| {
        b.iter(|| {
            reclaiming.push(black_box(1_u64));
            black_box(reclaiming.pop())
        })
    });

    let epoch = EpochStack::new();
    group.bench_function("epoch", |b| {
        b.iter(|| {
            epoch.push(black_box(1_u64));
            black_box(epoch.pop())
        })
    });

    let locked = LockedVec::make();
    group.bench_function("mutex_vec", |b| {
        b.iter(|| {
            locked.push(black_box(1));
            black_box(locked.pop())
        })
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_push_pop");
    group.sample_size(20);

    for threads in [2_usize, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * OPS_PER_THREAD * 2));
        group.bench_with_input(BenchmarkId::new("reclaiming", threads), &threads, |b, &n| {
            b.iter_custom(|iters| run_mixed::<ReclaimingStack<u64>>(n, iters))
        });
        group.bench_with_input(BenchmarkId::new("epoch", threads), &threads, |b, &n| {
            b.iter_custom(|iters| run_mixed::<EpochStack<u64>>(n, iters))
        });
        group.bench_with_input(BenchmarkId::new("mutex_vec", threads), &threads, |b, &n| {
            b.iter_custom(|iters| run_mixed::<LockedVec>(n, iters))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
