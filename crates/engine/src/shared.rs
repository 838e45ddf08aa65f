//! Cross-thread-visible transaction state
//!
//! A descriptor splits in two. [`TxShared`] is the half other threads may
//! touch: the packed status word, the published start timestamp, the write
//! arena (resolved through owned lock words) and the set-size counters the
//! karma policy reads. The private half lives in
//! [`crate::descriptor::TxDescriptor`].
//!
//! # Thread Safety
//!
//! Only the owning thread transitions the status word except for the kill
//! CAS, which any peer may attempt. All status accesses use `SeqCst`: the
//! peek protocol and the quiescence begin-gate both rely on a total order
//! between status stores and flag loads.

use crate::sets::WriteArena;
use crate::stats::ThreadStats;
use crate::status::{self, TxState, COMMITTING, IRREVOCABLE, KILLED};
use filament_core::CommitRecord;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// The externally visible half of a transaction descriptor.
pub struct TxShared {
    /// Registry slot, fixed for the life of the thread.
    slot: u16,
    /// Packed status word, see [`crate::status`].
    status: AtomicU64,
    /// Start timestamp of the current attempt (valid while Active).
    start: AtomicU64,
    /// Read-set size of the current attempt, for the karma policy.
    rset_len: AtomicU64,
    /// Write-set size of the current attempt, for the karma policy.
    wset_len: AtomicU64,
    /// Write entries, peekable through owned lock words.
    wset: WriteArena,
    /// Per-thread counters, aggregated on demand.
    stats: ThreadStats,
    /// Commit telemetry, drained by an external collector.
    commit_log: Mutex<Vec<CommitRecord>>,
}

impl TxShared {
    /// A fresh descriptor half for registry slot `slot`.
    pub fn new(slot: u16, set_capacity: usize, max_levels: usize) -> Self {
        TxShared {
            slot,
            status: AtomicU64::new(0),
            start: AtomicU64::new(0),
            rset_len: AtomicU64::new(0),
            wset_len: AtomicU64::new(0),
            wset: WriteArena::new(set_capacity),
            stats: ThreadStats::new(max_levels),
            commit_log: Mutex::new(Vec::new()),
        }
    }

    /// Registry slot.
    #[inline]
    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Raw status word.
    #[inline]
    pub fn status_raw(&self) -> u64 {
        self.status.load(Ordering::SeqCst)
    }

    /// Decoded lifecycle state.
    #[inline]
    pub fn state(&self) -> TxState {
        status::state(self.status_raw())
    }

    /// Transition to a fresh Active incarnation and return the new raw
    /// word. Owner-only; clears killed, committing and irrevocable.
    pub fn begin_active(&self) -> u64 {
        let next = status::next_active(self.status.load(Ordering::SeqCst));
        self.status.store(next, Ordering::SeqCst);
        next
    }

    /// Replace the state field, preserving incarnation and flags.
    /// Owner-only.
    pub fn set_state(&self, s: TxState) {
        let raw = self.status.load(Ordering::SeqCst);
        self.status.store(status::with_state(raw, s), Ordering::SeqCst);
    }

    /// Raise the committing flag unless a kill already landed. Returns
    /// `false` if the transaction was killed, in which case it must roll
    /// back instead of committing. Owner-only.
    pub fn begin_commit(&self) -> bool {
        loop {
            let raw = self.status.load(Ordering::SeqCst);
            if raw & KILLED != 0 {
                return false;
            }
            if self
                .status
                .compare_exchange(raw, raw | COMMITTING, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Deliver a kill to this transaction. Succeeds only while it is
    /// Active, not yet committing and not irrevocable. Any thread.
    pub fn try_kill(&self, expected_raw: u64) -> bool {
        if status::state(expected_raw) != TxState::Active
            || expected_raw & (COMMITTING | IRREVOCABLE) != 0
        {
            return false;
        }
        self.status
            .compare_exchange(
                expected_raw,
                expected_raw | KILLED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Whether a kill has been delivered to the current incarnation.
    #[inline]
    pub fn is_killed(&self) -> bool {
        self.status_raw() & KILLED != 0
    }

    /// Whether the current incarnation holds irrevocable rights.
    #[inline]
    pub fn is_irrevocable(&self) -> bool {
        self.status_raw() & IRREVOCABLE != 0
    }

    /// Grant irrevocable rights to the current incarnation. Owner-only.
    pub fn set_irrevocable(&self) {
        let raw = self.status.load(Ordering::SeqCst);
        self.status.store(raw | IRREVOCABLE, Ordering::SeqCst);
    }

    /// Published start timestamp of the current attempt.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::SeqCst)
    }

    /// Publish the start timestamp. Owner-only.
    #[inline]
    pub fn set_start(&self, ts: u64) {
        self.start.store(ts, Ordering::SeqCst);
    }

    /// Current set sizes as (reads, writes), for the karma policy.
    #[inline]
    pub fn set_sizes(&self) -> (u64, u64) {
        (
            self.rset_len.load(Ordering::Relaxed),
            self.wset_len.load(Ordering::Relaxed),
        )
    }

    /// Publish the current set sizes. Owner-only.
    #[inline]
    pub fn publish_set_sizes(&self, reads: u64, writes: u64) {
        self.rset_len.store(reads, Ordering::Relaxed);
        self.wset_len.store(writes, Ordering::Relaxed);
    }

    /// The write arena.
    #[inline]
    pub fn wset(&self) -> &WriteArena {
        &self.wset
    }

    /// Per-thread counters.
    #[inline]
    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    /// Append a commit record for the external collector.
    pub fn push_commit_record(&self, rec: CommitRecord) {
        self.commit_log.lock().push(rec);
    }

    /// Drain pending commit records.
    pub fn drain_commit_log(&self) -> Vec<CommitRecord> {
        std::mem::take(&mut *self.commit_log.lock())
    }
}

impl std::fmt::Debug for TxShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxShared")
            .field("slot", &self.slot)
            .field("state", &self.state())
            .field("wset_len", &self.wset.len())
            .finish()
    }
}
