//! Global version clock
//!
//! A single monotone counter. Commit-time designs advance it at least once
//! per writing commit; every published lock version derives from it, which
//! gives the snapshot ordering guarantee: a transaction that begins after a
//! commit completed starts at or above that commit's published version.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing global clock.
#[derive(Debug)]
pub struct GlobalClock {
    value: AtomicU64,
}

impl GlobalClock {
    /// A clock at zero.
    pub const fn new() -> Self {
        GlobalClock {
            value: AtomicU64::new(0),
        }
    }

    /// Current value (acquire ordering: pairs with commit publication).
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance the clock and return the new value.
    #[inline]
    pub fn fetch_inc(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Reset to zero. Only valid inside the quiescence barrier, together
    /// with the lock-table version reset.
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }
}

impl Default for GlobalClock {
    fn default() -> Self {
        Self::new()
    }
}
