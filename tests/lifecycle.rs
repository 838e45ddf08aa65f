//! Transaction lifecycle: nesting, attributes, hooks, irrevocability,
//! rollover and the telemetry surface.

use filament::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn small_runtime() -> Runtime {
    Runtime::builder()
        .heap_words(256)
        .lock_bits(6)
        .max_threads(8)
        .build()
        .unwrap()
}

#[test]
fn nested_transactions_are_flat() {
    let rt = small_runtime();
    let addr = rt.alloc(1).unwrap();
    let mut ctx = rt.thread_enter().unwrap();

    ctx.atomically(|txn| {
        txn.store(addr, 1)?;
        txn.nested(|inner| {
            // The inner transaction sees the outer's uncommitted write.
            assert_eq!(inner.load(addr)?, 1);
            inner.store(addr, 2)
        })?;
        // And its write stays visible after the inner commit.
        assert_eq!(txn.load(addr)?, 2);
        Ok(())
    })
    .unwrap();

    assert_eq!(rt.read_word(addr).unwrap(), 2);
    // One flat commit, not two.
    assert_eq!(rt.stats().commits, 1);
}

#[test]
fn explicit_abort_retries_and_no_retry_fails_fast() {
    let rt = small_runtime();
    let addr = rt.alloc(1).unwrap();
    let mut ctx = rt.thread_enter().unwrap();

    let mut aborted_once = false;
    ctx.atomically(|txn| {
        txn.store(addr, 1)?;
        if !aborted_once {
            aborted_once = true;
            return Err(txn.abort(42));
        }
        Ok(())
    })
    .unwrap();
    assert!(aborted_once);

    let attr = TxAttributes {
        no_retry: true,
        ..TxAttributes::default()
    };
    let err = ctx
        .atomically_with(attr, |txn| Err::<(), _>(txn.abort(7)))
        .unwrap_err();
    match err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 1);
            assert_eq!(last, AbortReason::Explicit(7));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn retry_budget_is_enforced() {
    let rt = Runtime::builder()
        .heap_words(64)
        .max_retries(Some(3))
        .build()
        .unwrap();
    let mut ctx = rt.thread_enter().unwrap();
    let err = ctx
        .atomically(|txn| Err::<(), _>(txn.abort(0)))
        .unwrap_err();
    match err {
        Error::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn masked_stores_compose() {
    let rt = small_runtime();
    let addr = rt.alloc(1).unwrap();
    rt.write_word(addr, 0xaaaa_bbbb_cccc_dddd).unwrap();
    let mut ctx = rt.thread_enter().unwrap();

    ctx.atomically(|txn| {
        txn.store_masked(addr, 0x1111, 0xffff)?;
        txn.store_masked(addr, 0x2222_0000, 0xffff_0000)?;
        assert_eq!(txn.load(addr)?, 0xaaaa_bbbb_2222_1111);
        Ok(())
    })
    .unwrap();
    assert_eq!(rt.read_word(addr).unwrap(), 0xaaaa_bbbb_2222_1111);
}

#[test]
fn lifecycle_hooks_fire() {
    let rt = small_runtime();
    let begins = Arc::new(AtomicU64::new(0));
    let commits = Arc::new(AtomicU64::new(0));
    let aborts = Arc::new(AtomicU64::new(0));

    {
        let begins = Arc::clone(&begins);
        rt.callbacks()
            .on_tx_begin(Box::new(move |_| {
                begins.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
    }
    {
        let commits = Arc::clone(&commits);
        rt.callbacks()
            .on_tx_commit(Box::new(move |_| {
                commits.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
    }
    {
        let aborts = Arc::clone(&aborts);
        rt.callbacks()
            .on_tx_abort(Box::new(move |_, _| {
                aborts.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
    }

    let addr = rt.alloc(1).unwrap();
    let mut ctx = rt.thread_enter().unwrap();

    // Registration after the first thread entered is rejected.
    assert!(rt.callbacks().on_tx_begin(Box::new(|_| {})).is_err());

    let mut first = true;
    ctx.atomically(|txn| {
        txn.store(addr, 1)?;
        if first {
            first = false;
            return Err(txn.abort(0));
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(begins.load(Ordering::Relaxed), 2);
    assert_eq!(commits.load(Ordering::Relaxed), 1);
    assert_eq!(aborts.load(Ordering::Relaxed), 1);
}

#[test]
fn specific_data_survives_retries() {
    let rt = small_runtime();
    let mut ctx = rt.thread_enter().unwrap();

    let mut attempt = 0u32;
    let seen = ctx
        .atomically(|txn| {
            attempt += 1;
            if attempt == 1 {
                txn.set_specific(0, Box::new(String::from("carried"))).unwrap();
                return Err(txn.abort(0));
            }
            let s = txn
                .specific(0)
                .and_then(|v| v.downcast_ref::<String>())
                .cloned();
            Ok(s)
        })
        .unwrap();
    assert_eq!(seen.as_deref(), Some("carried"));
}

#[test]
fn irrevocable_serial_runs_alone() {
    let rt = Arc::new(small_runtime());
    let addr = rt.alloc(1).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let rt = Arc::clone(&rt);
            std::thread::spawn(move || {
                let mut ctx = rt.thread_enter().unwrap();
                for _ in 0..200 {
                    ctx.atomically(|txn| {
                        txn.become_irrevocable(true)?;
                        let v = txn.load(addr)?;
                        txn.store(addr, v + 1)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(rt.read_word(addr).unwrap(), 600);
}

#[test]
fn clock_rollover_is_transparent() {
    let rt = Arc::new(
        Runtime::builder()
            .heap_words(64)
            .lock_bits(4)
            .max_threads(4)
            .version_max(100)
            .build()
            .unwrap(),
    );
    let addr = rt.alloc(1).unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let rt = Arc::clone(&rt);
            std::thread::spawn(move || {
                let mut ctx = rt.thread_enter().unwrap();
                for _ in 0..500 {
                    ctx.atomically(|txn| {
                        let v = txn.load(addr)?;
                        txn.store(addr, v + 1)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // 1000 writing commits crossed the ceiling of 100 repeatedly.
    assert_eq!(rt.read_word(addr).unwrap(), 1_000);
}

#[test]
fn stats_and_parameters_by_name() {
    let rt = small_runtime();
    let addr = rt.alloc(1).unwrap();
    let mut ctx = rt.thread_enter().unwrap();
    ctx.atomically(|txn| txn.store(addr, 1)).unwrap();

    assert_eq!(rt.stat("global_nb_commits"), Some(1));
    assert_eq!(rt.stat("global_nb_aborts"), Some(0));
    assert_eq!(rt.stat("bogus"), None);
    assert_eq!(rt.parameter("design").as_deref(), Some("write-back-etl"));
    assert_eq!(rt.parameter("bogus"), None);

    let log = rt.drain_commit_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].end_ns >= log[0].start_ns);
}

#[test]
fn read_only_transactions_leave_clock_alone() {
    let rt = small_runtime();
    let addr = rt.alloc(1).unwrap();
    let mut ctx = rt.thread_enter().unwrap();

    let attr = TxAttributes {
        read_only: true,
        ..TxAttributes::default()
    };
    ctx.atomically_with(attr, |txn| txn.load(addr)).unwrap();
    ctx.atomically(|txn| txn.store(addr, 1)).unwrap();
    ctx.atomically_with(attr, |txn| txn.load(addr)).unwrap();

    // Only the writing commit advanced the clock.
    assert_eq!(rt.stat("global_nb_commits"), Some(3));
    let stats = rt.stats();
    assert_eq!(stats.commits, 3);
}

#[test]
fn status_queries_track_the_attempt() {
    let rt = small_runtime();
    let addr = rt.alloc(1).unwrap();
    let mut ctx = rt.thread_enter().unwrap();

    ctx.atomically(|txn| {
        assert!(txn.active());
        assert!(!txn.aborted());
        assert!(!txn.irrevocable());
        txn.become_irrevocable(false)?;
        assert!(txn.irrevocable());
        txn.store(addr, 7)
    })
    .unwrap();
    assert_eq!(rt.read_word(addr).unwrap(), 7);
}
