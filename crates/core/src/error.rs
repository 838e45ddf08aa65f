//! Error taxonomy
//!
//! Two distinct families, matching the engine's recovery model:
//!
//! - [`AbortReason`]: transaction-local failures (conflicts, validation,
//!   kill decisions). Always recoverable — the engine rolls back and
//!   retries, and clients only ever see one if a retry budget is exhausted.
//! - [`Error`]: setup-time and fatal conditions (bad configuration,
//!   capacity exhaustion at startup, faults outside any transaction).
//!   Reported synchronously, never retried.

use thiserror::Error;

/// Result alias for fallible engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What kind of access discovered a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A transactional load found the slot owned by another transaction.
    Load,
    /// A store (or commit-time lock acquisition) lost to another owner.
    Store,
    /// Read-set validation found a version moved or a foreign owner.
    Validate,
}

/// Why a transaction attempt rolled back.
///
/// Every variant is recoverable: the retry loop rolls the transaction back
/// to its begin checkpoint and runs it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Lock conflict detected at load/store time.
    Conflict(ConflictKind),
    /// Read-set no longer consistent at commit/extension time.
    Validate,
    /// Killed by another transaction's contention-manager decision.
    Killed,
    /// Lost the race for exclusive (irrevocable) execution.
    Irrevocable,
    /// Out-of-range word access during speculative execution.
    Fault,
    /// Explicit abort requested by the client, with a client-chosen code.
    Explicit(u32),
}

impl AbortReason {
    /// Stable name used for statistics keys.
    pub fn name(&self) -> &'static str {
        match self {
            AbortReason::Conflict(ConflictKind::Load) => "conflict_load",
            AbortReason::Conflict(ConflictKind::Store) => "conflict_store",
            AbortReason::Conflict(ConflictKind::Validate) => "conflict_validate",
            AbortReason::Validate => "validate",
            AbortReason::Killed => "killed",
            AbortReason::Irrevocable => "irrevocable",
            AbortReason::Fault => "fault",
            AbortReason::Explicit(_) => "explicit",
        }
    }

    /// Dense index for per-reason counters.
    pub fn counter_index(&self) -> usize {
        match self {
            AbortReason::Conflict(ConflictKind::Load) => 0,
            AbortReason::Conflict(ConflictKind::Store) => 1,
            AbortReason::Conflict(ConflictKind::Validate) => 2,
            AbortReason::Validate => 3,
            AbortReason::Killed => 4,
            AbortReason::Irrevocable => 5,
            AbortReason::Fault => 6,
            AbortReason::Explicit(_) => 7,
        }
    }

    /// Number of distinct counter slots.
    pub const COUNTERS: usize = 8;
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Explicit(code) => write!(f, "explicit({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Setup-time and fatal errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration (unknown policy name, zero-sized table, ...).
    /// Non-retryable; the caller must fix the configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A fixed bound was exceeded at setup time.
    #[error("{resource} capacity exceeded: {requested} > {limit}")]
    Capacity {
        /// Which bounded resource overflowed.
        resource: &'static str,
        /// The configured bound.
        limit: usize,
        /// What was asked for.
        requested: usize,
    },

    /// Word access outside the heap, with no transaction to roll back.
    #[error("invalid word access: {addr} outside heap of {size} words")]
    Fault {
        /// The faulting word index.
        addr: usize,
        /// Heap size in words.
        size: usize,
    },

    /// A configured retry bound was reached without a successful commit.
    #[error("transaction aborted {attempts} times (last: {last}); retry budget exhausted")]
    RetriesExhausted {
        /// How many attempts were made.
        attempts: u64,
        /// The final abort reason.
        last: AbortReason,
    },

    /// Operation on a runtime that has already been shut down.
    #[error("runtime is shut down")]
    ShutDown,
}

impl Error {
    /// Whether retrying with the same inputs can ever succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }
}
