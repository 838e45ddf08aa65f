//! Synthetic transactional workload
//!
//! Each transaction touches a run of words in a shared array, reading or
//! rewriting each according to a read percentage. Sweeping the read mix
//! and the array size moves the workload between read-dominated (few
//! conflicts, snapshot extensions do the work) and write-dominated
//! (lock contention, contention-manager decisions).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use filament::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

const ITEMS: usize = 1 << 10;
const TX_LENGTH: usize = 8;
const TX_PER_THREAD: usize = 500;

fn run_mix(rt: &Arc<Runtime>, base: Addr, threads: usize, read_pct: u32) {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let rt = Arc::clone(rt);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                let mut ctx = rt.thread_enter().unwrap();
                for _ in 0..TX_PER_THREAD {
                    let start = rng.gen_range(0..ITEMS);
                    let reads: Vec<bool> = (0..TX_LENGTH)
                        .map(|_| rng.gen_range(0..100) < read_pct)
                        .collect();
                    ctx.atomically(|txn| {
                        for (i, &is_read) in reads.iter().enumerate() {
                            let addr = base.offset((start + i) % ITEMS);
                            let v = txn.load(addr)?;
                            if !is_read {
                                txn.store(addr, v.wrapping_add(1))?;
                            }
                        }
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

fn bench_read_mixes(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthetic_mix");
    group.throughput(Throughput::Elements((4 * TX_PER_THREAD) as u64));

    for read_pct in [95u32, 50, 10] {
        for design in [
            DesignVariant::WriteBackEtl,
            DesignVariant::WriteBackCtl,
            DesignVariant::WriteThrough,
        ] {
            let id = BenchmarkId::new(format!("{}r", read_pct), format!("{design:?}"));
            group.bench_function(id, |b| {
                b.iter_batched(
                    || {
                        let rt = Arc::new(
                            Runtime::builder()
                                .design(design)
                                .heap_words(ITEMS)
                                .lock_bits(10)
                                .max_threads(8)
                                .build()
                                .unwrap(),
                        );
                        let base = rt.alloc(ITEMS).unwrap();
                        (rt, base)
                    },
                    |(rt, base)| run_mix(&rt, base, 4, read_pct),
                    criterion::BatchSize::PerIteration,
                );
            });
        }
    }
    group.finish();
}

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements((8 * TX_PER_THREAD) as u64));

    for cap in [2usize, 8] {
        group.bench_function(BenchmarkId::from_parameter(cap), |b| {
            b.iter_batched(
                || {
                    let rt = Arc::new(
                        Runtime::builder()
                            .heap_words(ITEMS)
                            .lock_bits(10)
                            .max_threads(16)
                            .admission(AdmissionConfig {
                                initial_cap: cap,
                                scaling: false,
                                ..AdmissionConfig::default()
                            })
                            .build()
                            .unwrap(),
                    );
                    let base = rt.alloc(ITEMS).unwrap();
                    (rt, base)
                },
                |(rt, base)| run_mix(&rt, base, 8, 20),
                criterion::BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_read_mixes, bench_admission);
criterion_main!(benches);
