//! Thread-private descriptor state
//!
//! Everything a transaction needs that no other thread ever inspects:
//! the read set, the undo log and held-lock list for write-through, the
//! snapshot window, retry bookkeeping and the per-thread specific-data
//! slots. The shared half lives in [`crate::shared::TxShared`].

use crate::sets::{ReadSet, UndoEntry};
use crate::shared::TxShared;
use filament_core::{Error, Result};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of transaction-specific data slots per thread.
pub const MAX_SPECIFIC: usize = 16;

/// Client-provided attributes for one transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxAttributes {
    /// Workload class, forwarded to scheduling and statistics.
    pub class_id: u32,
    /// The transaction promises not to write. Read-only transactions skip
    /// write-set machinery and commit without touching the clock.
    pub read_only: bool,
    /// Fail with the abort reason instead of retrying.
    pub no_retry: bool,
}

/// The thread-private half of a transaction descriptor.
pub struct TxDescriptor {
    /// Shared half, registered for the life of the thread.
    pub shared: Arc<TxShared>,
    /// Attributes of the current transaction.
    pub attr: TxAttributes,
    /// Snapshot window start (begin timestamp).
    pub start: u64,
    /// Snapshot window end; grows on successful extension.
    pub end: u64,
    /// Observed reads of the current attempt.
    pub rset: ReadSet,
    /// Undo log for the write-through design.
    pub undo: Vec<UndoEntry>,
    /// Stripes locked by write-through, with the version each displaced.
    pub wt_locks: Vec<(usize, u64)>,
    /// Flat-nesting depth; only the outermost begin/commit do real work.
    pub nesting: u32,
    /// Aborted attempts of the current transaction.
    pub retries: u64,
    /// Consecutive contention losses, feeding the backoff curve.
    pub losses: u32,
    /// Stripe to wait on before the next attempt, if the contention
    /// manager asked us to.
    pub wait_lock: Option<usize>,
    /// Backoff to apply before the next attempt.
    pub backoff: Option<Duration>,
    /// Holding the serial-irrevocable exclusivity gate.
    pub serial: bool,
    /// Begin instant of the current attempt, for work accounting.
    pub attempt_started: Instant,
    /// Concurrency level observed at begin.
    pub level: usize,
    /// Transaction-specific data slots.
    specific: [Option<Box<dyn Any + Send>>; MAX_SPECIFIC],
}

impl TxDescriptor {
    /// A descriptor wrapping `shared`.
    pub fn new(shared: Arc<TxShared>, set_capacity: usize) -> Self {
        TxDescriptor {
            shared,
            attr: TxAttributes::default(),
            start: 0,
            end: 0,
            rset: ReadSet::with_capacity(set_capacity),
            undo: Vec::new(),
            wt_locks: Vec::new(),
            nesting: 0,
            retries: 0,
            losses: 0,
            wait_lock: None,
            backoff: None,
            serial: false,
            attempt_started: Instant::now(),
            level: 0,
            specific: Default::default(),
        }
    }

    /// Registry slot of this thread.
    #[inline]
    pub fn slot(&self) -> u16 {
        self.shared.slot()
    }

    /// Reset per-attempt state. Attributes, retry counters and specific
    /// data survive across attempts of the same transaction.
    pub fn reset_attempt(&mut self) {
        self.rset.clear();
        self.shared.wset().clear();
        self.undo.clear();
        self.wt_locks.clear();
        self.shared.publish_set_sizes(0, 0);
        self.attempt_started = Instant::now();
    }

    /// Store a value in specific-data slot `idx`.
    pub fn set_specific(&mut self, idx: usize, value: Box<dyn Any + Send>) -> Result<()> {
        if idx >= MAX_SPECIFIC {
            return Err(Error::Capacity {
                resource: "specific slots",
                limit: MAX_SPECIFIC,
                requested: idx + 1,
            });
        }
        self.specific[idx] = Some(value);
        Ok(())
    }

    /// Borrow the value in specific-data slot `idx`, if any.
    pub fn specific(&self, idx: usize) -> Option<&(dyn Any + Send)> {
        self.specific.get(idx).and_then(|s| s.as_deref())
    }

    /// Take the value out of specific-data slot `idx`.
    pub fn take_specific(&mut self, idx: usize) -> Option<Box<dyn Any + Send>> {
        self.specific.get_mut(idx).and_then(|s| s.take())
    }

    /// Nanoseconds spent in the current attempt.
    pub fn attempt_ns(&self) -> u64 {
        self.attempt_started.elapsed().as_nanos() as u64
    }
}

impl std::fmt::Debug for TxDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxDescriptor")
            .field("slot", &self.slot())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("rset", &self.rset.len())
            .field("wset", &self.shared.wset().len())
            .field("nesting", &self.nesting)
            .field("retries", &self.retries)
            .finish()
    }
}
