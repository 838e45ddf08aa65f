//! Per-thread and aggregated counters
//!
//! Each thread owns a [`ThreadStats`] inside its shared descriptor and
//! bumps it with relaxed atomics; nothing on the hot path synchronizes on
//! statistics. [`GlobalStats`] is computed on demand by summing over the
//! registry, so a reader sees a near-consistent snapshot rather than an
//! exact one.

use filament_core::AbortReason;
use std::sync::atomic::{AtomicU64, Ordering};

const COUNTERS: usize = AbortReason::COUNTERS;

/// Counters owned by one thread.
#[derive(Debug)]
pub struct ThreadStats {
    commits: AtomicU64,
    aborts: AtomicU64,
    retries_current: AtomicU64,
    retries_min: AtomicU64,
    retries_max: AtomicU64,
    retries_acc: AtomicU64,
    retries_cnt: AtomicU64,
    extensions: AtomicU64,
    relocks: AtomicU64,
    aborts_by_reason: [AtomicU64; COUNTERS],
    /// Committed work in ns, indexed by concurrency level at begin.
    useful_ns_by_level: Box<[AtomicU64]>,
    /// Rolled-back work in ns, same indexing.
    wasted_ns_by_level: Box<[AtomicU64]>,
    commits_by_level: Box<[AtomicU64]>,
    aborts_by_level: Box<[AtomicU64]>,
}

fn zeroed(n: usize) -> Box<[AtomicU64]> {
    let mut v = Vec::with_capacity(n);
    v.resize_with(n, || AtomicU64::new(0));
    v.into_boxed_slice()
}

impl ThreadStats {
    /// Counters with per-level arrays covering levels `0..=max_levels`.
    pub fn new(max_levels: usize) -> Self {
        ThreadStats {
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            retries_current: AtomicU64::new(0),
            retries_min: AtomicU64::new(u64::MAX),
            retries_max: AtomicU64::new(0),
            retries_acc: AtomicU64::new(0),
            retries_cnt: AtomicU64::new(0),
            extensions: AtomicU64::new(0),
            relocks: AtomicU64::new(0),
            aborts_by_reason: Default::default(),
            useful_ns_by_level: zeroed(max_levels + 1),
            wasted_ns_by_level: zeroed(max_levels + 1),
            commits_by_level: zeroed(max_levels + 1),
            aborts_by_level: zeroed(max_levels + 1),
        }
    }

    /// Record a commit: retry count of the whole transaction, duration of
    /// the winning attempt, concurrency level at its begin.
    pub fn on_commit(&self, duration_ns: u64, level: usize) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        let retries = self.retries_current.swap(0, Ordering::Relaxed);
        self.retries_acc.fetch_add(retries, Ordering::Relaxed);
        self.retries_cnt.fetch_add(1, Ordering::Relaxed);
        self.retries_min.fetch_min(retries, Ordering::Relaxed);
        self.retries_max.fetch_max(retries, Ordering::Relaxed);
        let level = level.min(self.useful_ns_by_level.len() - 1);
        self.useful_ns_by_level[level].fetch_add(duration_ns, Ordering::Relaxed);
        self.commits_by_level[level].fetch_add(1, Ordering::Relaxed);
    }

    /// Record an aborted attempt and its wasted work.
    pub fn on_abort(&self, reason: AbortReason, duration_ns: u64, level: usize) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        self.retries_current.fetch_add(1, Ordering::Relaxed);
        self.aborts_by_reason[reason.counter_index()].fetch_add(1, Ordering::Relaxed);
        let level = level.min(self.wasted_ns_by_level.len() - 1);
        self.wasted_ns_by_level[level].fetch_add(duration_ns, Ordering::Relaxed);
        self.aborts_by_level[level].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful snapshot extension.
    #[inline]
    pub fn on_extend(&self) {
        self.extensions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock re-acquisition after a read-from-owner upgrade.
    #[inline]
    pub fn on_relock(&self) {
        self.relocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Commits recorded so far.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Aborted attempts recorded so far.
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    fn add_into(&self, agg: &mut GlobalStats) {
        agg.commits += self.commits.load(Ordering::Relaxed);
        agg.aborts += self.aborts.load(Ordering::Relaxed);
        agg.extensions += self.extensions.load(Ordering::Relaxed);
        agg.relocks += self.relocks.load(Ordering::Relaxed);
        agg.retries_sum += self.retries_acc.load(Ordering::Relaxed);
        agg.retries_samples += self.retries_cnt.load(Ordering::Relaxed);
        let min = self.retries_min.load(Ordering::Relaxed);
        if min < agg.retries_min {
            agg.retries_min = min;
        }
        let max = self.retries_max.load(Ordering::Relaxed);
        if max > agg.retries_max {
            agg.retries_max = max;
        }
        for (i, c) in self.aborts_by_reason.iter().enumerate() {
            agg.aborts_by_reason[i] += c.load(Ordering::Relaxed);
        }
        for (i, sample) in agg.levels.iter_mut().enumerate() {
            sample.useful_ns += self.useful_ns_by_level[i].load(Ordering::Relaxed);
            sample.wasted_ns += self.wasted_ns_by_level[i].load(Ordering::Relaxed);
            sample.commits += self.commits_by_level[i].load(Ordering::Relaxed);
            sample.aborts += self.aborts_by_level[i].load(Ordering::Relaxed);
        }
    }
}

/// Aggregated work observed at one concurrency level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelSample {
    /// Committed work in nanoseconds.
    pub useful_ns: u64,
    /// Rolled-back work in nanoseconds.
    pub wasted_ns: u64,
    /// Commits that began at this level.
    pub commits: u64,
    /// Aborted attempts that began at this level.
    pub aborts: u64,
}

/// Sum of all per-thread counters at one point in time.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    /// Total commits.
    pub commits: u64,
    /// Total aborted attempts.
    pub aborts: u64,
    /// Total successful snapshot extensions.
    pub extensions: u64,
    /// Total lock re-acquisitions.
    pub relocks: u64,
    /// Sum of per-transaction retry counts.
    pub retries_sum: u64,
    /// Number of committed transactions contributing to `retries_sum`.
    pub retries_samples: u64,
    /// Smallest retry count seen for a committed transaction.
    pub retries_min: u64,
    /// Largest retry count seen for a committed transaction.
    pub retries_max: u64,
    /// Aborts broken out by reason, indexed by
    /// [`AbortReason::counter_index`].
    pub aborts_by_reason: [u64; COUNTERS],
    /// Per-concurrency-level work samples.
    pub levels: Vec<LevelSample>,
}

impl GlobalStats {
    /// An all-zero aggregate covering levels `0..=max_levels`.
    pub fn zero(max_levels: usize) -> Self {
        GlobalStats {
            commits: 0,
            aborts: 0,
            extensions: 0,
            relocks: 0,
            retries_sum: 0,
            retries_samples: 0,
            retries_min: u64::MAX,
            retries_max: 0,
            aborts_by_reason: [0; COUNTERS],
            levels: vec![LevelSample::default(); max_levels + 1],
        }
    }

    /// Fold one thread's counters into this aggregate.
    pub fn absorb(&mut self, stats: &ThreadStats) {
        stats.add_into(self);
    }

    /// Mean retries per committed transaction.
    pub fn retries_avg(&self) -> f64 {
        if self.retries_samples == 0 {
            0.0
        } else {
            self.retries_sum as f64 / self.retries_samples as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_core::ConflictKind;

    #[test]
    fn test_commit_resets_retry_counter() {
        let s = ThreadStats::new(4);
        s.on_abort(AbortReason::Conflict(ConflictKind::Load), 10, 1);
        s.on_abort(AbortReason::Validate, 10, 1);
        s.on_commit(100, 1);
        s.on_commit(50, 2);

        let mut g = GlobalStats::zero(4);
        g.absorb(&s);
        assert_eq!(g.commits, 2);
        assert_eq!(g.aborts, 2);
        assert_eq!(g.retries_min, 0);
        assert_eq!(g.retries_max, 2);
        assert_eq!(g.retries_avg(), 1.0);
    }

    #[test]
    fn test_level_attribution() {
        let s = ThreadStats::new(4);
        s.on_commit(100, 2);
        s.on_abort(AbortReason::Validate, 40, 3);
        // Levels past the array clamp to the last bucket.
        s.on_commit(7, 99);

        let mut g = GlobalStats::zero(4);
        g.absorb(&s);
        assert_eq!(g.levels[2].useful_ns, 100);
        assert_eq!(g.levels[2].commits, 1);
        assert_eq!(g.levels[3].wasted_ns, 40);
        assert_eq!(g.levels[3].aborts, 1);
        assert_eq!(g.levels[4].useful_ns, 7);
    }

    #[test]
    fn test_abort_reason_breakout() {
        let s = ThreadStats::new(1);
        s.on_abort(AbortReason::Killed, 1, 0);
        s.on_abort(AbortReason::Killed, 1, 0);
        s.on_abort(AbortReason::Conflict(ConflictKind::Store), 1, 0);

        let mut g = GlobalStats::zero(1);
        g.absorb(&s);
        assert_eq!(g.aborts_by_reason[AbortReason::Killed.counter_index()], 2);
        assert_eq!(
            g.aborts_by_reason[AbortReason::Conflict(ConflictKind::Store).counter_index()],
            1
        );
    }

    #[test]
    fn test_absorb_multiple_threads() {
        let a = ThreadStats::new(2);
        let b = ThreadStats::new(2);
        a.on_commit(10, 1);
        b.on_commit(20, 1);
        b.on_extend();

        let mut g = GlobalStats::zero(2);
        g.absorb(&a);
        g.absorb(&b);
        assert_eq!(g.commits, 2);
        assert_eq!(g.extensions, 1);
        assert_eq!(g.levels[1].useful_ns, 30);
    }
}
