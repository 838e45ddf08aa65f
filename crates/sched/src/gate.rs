//! The admission gate
//!
//! Threads pass through the gate before every top-level transaction and
//! leave it after commit. Admission is a CAS on the running counter
//! against the current cap; threads over the cap spin for a budget, then
//! yield, then sleep, so a long queue does not burn cores.
//!
//! # Thread Safety
//!
//! Plain atomics throughout. The cap may move underneath a waiter at any
//! time; waiters always re-read it, so a raised cap is picked up within
//! one spin iteration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Spins per waiting round before yielding to the OS.
const SPIN_BUDGET: u32 = 500_000;
/// Rounds of spin-then-yield before the waiter starts sleeping.
const YIELD_ROUNDS: u32 = 4;
/// Sleep applied once the yield rounds are exhausted.
const PARK_SLEEP: Duration = Duration::from_micros(50);

/// Counting gate bounding concurrently admitted transactions.
#[derive(Debug)]
pub struct AdmissionGate {
    cap: AtomicUsize,
    running: AtomicUsize,
    queued: AtomicUsize,
}

impl AdmissionGate {
    /// A gate admitting up to `cap` transactions at once.
    pub fn new(cap: usize) -> Self {
        AdmissionGate {
            cap: AtomicUsize::new(cap.max(1)),
            running: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    /// Current cap.
    #[inline]
    pub fn cap(&self) -> usize {
        self.cap.load(Ordering::Acquire)
    }

    /// Move the cap. Values below one are clamped; shrinking never evicts
    /// already-admitted transactions, the count drains naturally.
    pub fn set_cap(&self, cap: usize) {
        self.cap.store(cap.max(1), Ordering::Release);
    }

    /// Transactions currently admitted.
    #[inline]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Threads currently waiting for admission.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Try to get admitted without waiting. On success returns the
    /// concurrency level including the caller.
    pub fn try_admit(&self) -> Option<usize> {
        loop {
            let running = self.running.load(Ordering::Acquire);
            if running >= self.cap.load(Ordering::Acquire) {
                return None;
            }
            if self
                .running
                .compare_exchange_weak(running, running + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(running + 1);
            }
        }
    }

    /// Wait for admission. Returns the concurrency level including the
    /// caller.
    pub fn admit(&self) -> usize {
        if let Some(level) = self.try_admit() {
            return level;
        }
        self.queued.fetch_add(1, Ordering::AcqRel);
        let mut round = 0u32;
        loop {
            for _ in 0..SPIN_BUDGET {
                if let Some(level) = self.try_admit() {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    return level;
                }
                std::hint::spin_loop();
            }
            if round < YIELD_ROUNDS {
                round += 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(PARK_SLEEP);
            }
        }
    }

    /// Leave the gate after commit or a final abort.
    pub fn release(&self) {
        let prev = self.running.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_admit_respects_cap() {
        let gate = AdmissionGate::new(2);
        assert_eq!(gate.try_admit(), Some(1));
        assert_eq!(gate.try_admit(), Some(2));
        assert_eq!(gate.try_admit(), None);
        gate.release();
        assert_eq!(gate.try_admit(), Some(2));
    }

    #[test]
    fn test_cap_clamped_to_one() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.cap(), 1);
        gate.set_cap(0);
        assert_eq!(gate.cap(), 1);
    }

    #[test]
    fn test_raising_cap_unblocks_waiter() {
        let gate = Arc::new(AdmissionGate::new(1));
        assert!(gate.try_admit().is_some());

        let gate2 = Arc::clone(&gate);
        let waiter = thread::spawn(move || gate2.admit());
        while gate.queued() == 0 {
            thread::yield_now();
        }
        gate.set_cap(2);
        assert_eq!(waiter.join().unwrap(), 2);
        assert_eq!(gate.queued(), 0);
    }

    #[test]
    fn test_release_unblocks_waiter() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.admit();
        let gate2 = Arc::clone(&gate);
        let waiter = thread::spawn(move || gate2.admit());
        while gate.queued() == 0 {
            thread::yield_now();
        }
        gate.release();
        assert_eq!(waiter.join().unwrap(), 1);
    }

    #[test]
    fn test_running_never_exceeds_cap() {
        let gate = Arc::new(AdmissionGate::new(3));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let level = gate.admit();
                        max_seen.fetch_max(level, Ordering::Relaxed);
                        assert!(gate.running() <= gate.cap());
                        gate.release();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::Relaxed) <= 3);
        assert_eq!(gate.running(), 0);
    }
}
