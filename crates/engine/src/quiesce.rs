//! Cooperative quiescence
//!
//! Clock rollover and serial-irrevocable mode both need a window in which
//! no other transaction runs. The barrier is cooperative: a coordinator
//! raises a gate flag, new transactions park at begin, and the coordinator
//! waits for every already-running peer to reach Inactive before doing its
//! exclusive work.
//!
//! # Design
//!
//! The gate flag and the status words are both `SeqCst`. A thread entering
//! `begin` first publishes its Active status, then checks the flag; the
//! coordinator first raises the flag, then scans statuses. Whichever order
//! the two interleave in, either the coordinator sees the newcomer as
//! running and waits for it, or the newcomer sees the flag and parks. No
//! transaction slips through unobserved.

use crate::registry::Registry;
use crate::status;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// The quiescence gate.
#[derive(Debug)]
pub struct Quiesce {
    /// Raised while a coordinator wants (or holds) exclusivity.
    halt: AtomicBool,
    /// Serializes coordinators.
    coord: Mutex<()>,
    /// Parks threads waiting for the gate to drop.
    gate: Mutex<()>,
    opened: Condvar,
}

impl Quiesce {
    /// An open gate.
    pub fn new() -> Self {
        Quiesce {
            halt: AtomicBool::new(false),
            coord: Mutex::new(()),
            gate: Mutex::new(()),
            opened: Condvar::new(),
        }
    }

    /// Whether a coordinator has requested the world to stop.
    #[inline]
    pub fn halt_requested(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Park until the gate is open. Called from `begin` after the caller
    /// reverted its status to Inactive, so the coordinator does not wait
    /// on us.
    pub fn wait_open(&self) {
        let mut guard = self.gate.lock();
        while self.halt.load(Ordering::SeqCst) {
            self.opened.wait(&mut guard);
        }
    }

    /// Stop the world, run `f`, restart it. `exclude` is the caller's own
    /// slot (it is of course still running). Spins on the registry scan;
    /// transactions are short, so the coordinator's wait is too.
    pub fn barrier<T>(&self, registry: &Registry, exclude: Option<u16>, f: impl FnOnce() -> T) -> T {
        let _coord = self.coord.lock();
        self.halt.store(true, Ordering::SeqCst);
        self.wait_quiescent(registry, exclude);
        let out = f();
        {
            let _gate = self.gate.lock();
            self.halt.store(false, Ordering::SeqCst);
        }
        self.opened.notify_all();
        out
    }

    /// Stop the world and keep it stopped. Pairs with
    /// [`Quiesce::leave_exclusive`]; used by serial-irrevocable mode,
    /// where the exclusive section is the caller's own transaction body.
    pub fn enter_exclusive(&self, registry: &Registry, exclude: Option<u16>) {
        std::mem::forget(self.coord.lock());
        self.halt.store(true, Ordering::SeqCst);
        self.wait_quiescent(registry, exclude);
    }

    /// Reopen the gate after [`Quiesce::enter_exclusive`].
    pub fn leave_exclusive(&self) {
        {
            let _gate = self.gate.lock();
            self.halt.store(false, Ordering::SeqCst);
        }
        // Safety: enter_exclusive leaked the guard while holding the lock.
        unsafe { self.coord.force_unlock() };
        self.opened.notify_all();
    }

    fn wait_quiescent(&self, registry: &Registry, exclude: Option<u16>) {
        loop {
            let running = registry
                .iter()
                .filter(|s| Some(s.slot()) != exclude)
                .any(|s| status::is_running(s.status_raw()));
            if !running {
                return;
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}

impl Default for Quiesce {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_barrier_runs_with_no_peers() {
        let reg = Registry::new(4, 16);
        let q = Quiesce::new();
        let out = q.barrier(&reg, None, || 42);
        assert_eq!(out, 42);
        assert!(!q.halt_requested());
    }

    #[test]
    fn test_barrier_waits_for_running_peer() {
        let reg = Arc::new(Registry::new(4, 16));
        let q = Arc::new(Quiesce::new());
        let peer = reg.attach().unwrap();
        peer.begin_active();

        let reg2 = Arc::clone(&reg);
        let q2 = Arc::clone(&q);
        let coordinator = thread::spawn(move || q2.barrier(&reg2, None, || ()));

        // The coordinator must not get through while the peer is Active.
        thread::sleep(Duration::from_millis(20));
        assert!(q.halt_requested());
        assert!(!coordinator.is_finished());

        peer.set_state(crate::status::TxState::Inactive);
        coordinator.join().unwrap();
        assert!(!q.halt_requested());
    }

    #[test]
    fn test_barrier_excludes_caller() {
        let reg = Registry::new(4, 16);
        let q = Quiesce::new();
        let me = reg.attach().unwrap();
        me.begin_active();
        // Without the exclusion this would deadlock.
        q.barrier(&reg, Some(me.slot()), || ());
    }

    #[test]
    fn test_wait_open_parks_until_reopen() {
        let reg = Arc::new(Registry::new(4, 16));
        let q = Arc::new(Quiesce::new());
        q.enter_exclusive(&reg, None);

        let q2 = Arc::clone(&q);
        let parked = thread::spawn(move || {
            q2.wait_open();
            true
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!parked.is_finished());

        q.leave_exclusive();
        assert!(parked.join().unwrap());
    }

    #[test]
    fn test_coordinators_serialize() {
        let reg = Arc::new(Registry::new(4, 16));
        let q = Arc::new(Quiesce::new());
        let counter = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                let q = Arc::clone(&q);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..50 {
                        q.barrier(&reg, None, || {
                            let mut c = counter.lock();
                            *c += 1;
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 200);
    }
}
