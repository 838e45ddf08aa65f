//! Concurrent correctness of the three commit protocols.

use filament::prelude::*;
use std::sync::Arc;
use std::thread;

fn runtime(design: DesignVariant) -> Runtime {
    Runtime::builder()
        .design(design)
        .heap_words(4096)
        .lock_bits(8)
        .max_threads(16)
        .build()
        .unwrap()
}

fn designs() -> [DesignVariant; 3] {
    [
        DesignVariant::WriteBackEtl,
        DesignVariant::WriteBackCtl,
        DesignVariant::WriteThrough,
    ]
}

#[test]
fn concurrent_increments_are_not_lost() {
    for design in designs() {
        let rt = Arc::new(runtime(design));
        let counter = rt.alloc(1).unwrap();
        let threads = 4;
        let per_thread = 2_000u64;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let rt = Arc::clone(&rt);
                thread::spawn(move || {
                    let mut ctx = rt.thread_enter().unwrap();
                    for _ in 0..per_thread {
                        ctx.atomically(|txn| {
                            let v = txn.load(counter)?;
                            txn.store(counter, v + 1)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(
            rt.read_word(counter).unwrap(),
            threads as u64 * per_thread,
            "lost updates under {design:?}"
        );
    }
}

#[test]
fn transfers_conserve_total() {
    // Move value between accounts; the sum must be invariant under any
    // interleaving and any design.
    for design in designs() {
        let rt = Arc::new(runtime(design));
        let accounts: Vec<Addr> = (0..8).map(|_| rt.alloc(1).unwrap()).collect();
        for &a in &accounts {
            rt.write_word(a, 100).unwrap();
        }
        let accounts = Arc::new(accounts);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let rt = Arc::clone(&rt);
                let accounts = Arc::clone(&accounts);
                thread::spawn(move || {
                    let mut ctx = rt.thread_enter().unwrap();
                    for i in 0..1_000usize {
                        let from = accounts[(t + i) % accounts.len()];
                        let to = accounts[(t + i * 3 + 1) % accounts.len()];
                        if from == to {
                            continue;
                        }
                        ctx.atomically(|txn| {
                            let f = txn.load(from)?;
                            let g = txn.load(to)?;
                            if f > 0 {
                                txn.store(from, f - 1)?;
                                txn.store(to, g + 1)?;
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

        let total: u64 = accounts.iter().map(|&a| rt.read_word(a).unwrap()).sum();
        assert_eq!(total, 800, "sum drifted under {design:?}");
    }
}

#[test]
fn readers_never_observe_torn_pairs() {
    // A writer keeps two words equal inside every transaction; a reader
    // snapshotting both must never see them differ.
    for design in designs() {
        let rt = Arc::new(runtime(design));
        let x = rt.alloc(1).unwrap();
        let y = rt.alloc(1).unwrap();

        let writer = {
            let rt = Arc::clone(&rt);
            thread::spawn(move || {
                let mut ctx = rt.thread_enter().unwrap();
                for i in 1..=3_000u64 {
                    ctx.atomically(|txn| {
                        txn.store(x, i)?;
                        txn.store(y, i)
                    })
                    .unwrap();
                }
            })
        };
        let reader = {
            let rt = Arc::clone(&rt);
            thread::spawn(move || {
                let mut ctx = rt.thread_enter().unwrap();
                for _ in 0..3_000 {
                    let (a, b) = ctx
                        .atomically(|txn| Ok((txn.load(x)?, txn.load(y)?)))
                        .unwrap();
                    assert_eq!(a, b, "torn read under {design:?}");
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }
}

#[test]
fn rollback_leaves_no_trace() {
    for design in designs() {
        let rt = runtime(design);
        let addr = rt.alloc(1).unwrap();
        rt.write_word(addr, 11).unwrap();

        let mut ctx = rt.thread_enter().unwrap();
        let mut first = true;
        let out = ctx
            .atomically(|txn| {
                txn.store(addr, 99)?;
                if first {
                    first = false;
                    return Err(txn.abort(1));
                }
                txn.load(addr)
            })
            .unwrap();

        // The first attempt's store must have been fully undone before
        // the retry began.
        assert_eq!(out, 99);
        assert_eq!(rt.read_word(addr).unwrap(), 99);
        let stats = rt.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.aborts, 1);
    }
}

#[test]
fn contention_policies_all_make_progress() {
    for policy in [
        ContentionPolicy::Aggressive,
        ContentionPolicy::Suicide,
        ContentionPolicy::Delay,
        ContentionPolicy::Timestamp,
        ContentionPolicy::Karma,
    ] {
        let rt = Arc::new(
            Runtime::builder()
                .contention(policy)
                .heap_words(64)
                .lock_bits(4)
                .max_threads(8)
                .build()
                .unwrap(),
        );
        let hot = rt.alloc(1).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rt = Arc::clone(&rt);
                thread::spawn(move || {
                    let mut ctx = rt.thread_enter().unwrap();
                    for _ in 0..500 {
                        ctx.atomically(|txn| {
                            let v = txn.load(hot)?;
                            txn.store(hot, v + 1)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rt.read_word(hot).unwrap(), 2_000, "{policy:?}");
    }
}

#[test]
fn unit_accesses_are_consistent() {
    let rt = runtime(DesignVariant::WriteBackEtl);
    let addr = rt.alloc(1).unwrap();
    let ctx = rt.thread_enter().unwrap();

    let t1 = ctx.unit_store(addr, 5).unwrap();
    let (value, version) = ctx.unit_load(addr).unwrap();
    assert_eq!(value, 5);
    assert_eq!(version, t1);

    let t2 = ctx.unit_store_masked(addr, 0xff00, 0xff00).unwrap();
    assert!(t2 > t1);
    assert_eq!(ctx.unit_load(addr).unwrap().0, 0xff05);
}
