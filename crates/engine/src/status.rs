//! Packed transaction status word
//!
//! A descriptor's status is a single `AtomicU64` so that peers can observe
//! and modify it with one CAS:
//!
//! ```text
//! [ incarnation:58 | irrevocable:1 | killed:1 | committing:1 | state:3 ]
//! ```
//!
//! The incarnation is bumped on every begin, including retries. It makes
//! the (slot, incarnation) pair a unique transaction identifier, and lets
//! a concurrent reader detect that an owner it peeked at has moved on: if
//! the status word changed in any way between two reads, the peek is
//! invalid.

/// Lifecycle states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No transaction in progress on this descriptor.
    Inactive,
    /// Speculatively executing.
    Active,
    /// Last attempt committed (transient, descriptor returns to Inactive).
    Committed,
    /// Last attempt rolled back (transient).
    Aborted,
}

const STATE_MASK: u64 = 0b111;
const STATE_INACTIVE: u64 = 0;
const STATE_ACTIVE: u64 = 1;
const STATE_COMMITTED: u64 = 2;
const STATE_ABORTED: u64 = 3;

/// Set while the owner is inside its commit write-back window. Peeking at
/// the owner's pending state is forbidden once this is up.
pub const COMMITTING: u64 = 1 << 3;
/// Set by a peer's contention-manager decision; observed by the victim at
/// its next checkpoint.
pub const KILLED: u64 = 1 << 4;
/// The transaction holds irrevocable execution rights and must not be
/// killed.
pub const IRREVOCABLE: u64 = 1 << 5;

const INCARNATION_SHIFT: u32 = 6;

/// Decode the state field.
#[inline]
pub fn state(raw: u64) -> TxState {
    match raw & STATE_MASK {
        STATE_ACTIVE => TxState::Active,
        STATE_COMMITTED => TxState::Committed,
        STATE_ABORTED => TxState::Aborted,
        _ => TxState::Inactive,
    }
}

/// Encode a state field value.
#[inline]
pub fn state_bits(s: TxState) -> u64 {
    match s {
        TxState::Inactive => STATE_INACTIVE,
        TxState::Active => STATE_ACTIVE,
        TxState::Committed => STATE_COMMITTED,
        TxState::Aborted => STATE_ABORTED,
    }
}

/// Incarnation counter of a raw status word.
#[inline]
pub fn incarnation(raw: u64) -> u64 {
    raw >> INCARNATION_SHIFT
}

/// A fresh ACTIVE word with the next incarnation; clears the committing,
/// killed and irrevocable flags.
#[inline]
pub fn next_active(raw: u64) -> u64 {
    ((incarnation(raw) + 1) << INCARNATION_SHIFT) | STATE_ACTIVE
}

/// Replace the state field, preserving incarnation and flags.
#[inline]
pub fn with_state(raw: u64, s: TxState) -> u64 {
    (raw & !STATE_MASK) | state_bits(s)
}

/// Whether the word carries an actively running transaction (used by the
/// quiescence scan; a committing transaction still counts as running).
#[inline]
pub fn is_running(raw: u64) -> bool {
    state(raw) == TxState::Active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_active_bumps_incarnation_and_clears_flags() {
        let raw = with_state(0, TxState::Inactive) | KILLED | COMMITTING;
        let next = next_active(raw);
        assert_eq!(state(next), TxState::Active);
        assert_eq!(incarnation(next), 1);
        assert_eq!(next & (KILLED | COMMITTING | IRREVOCABLE), 0);

        let again = next_active(next);
        assert_eq!(incarnation(again), 2);
    }

    #[test]
    fn test_with_state_preserves_rest() {
        let raw = next_active(0) | IRREVOCABLE;
        let done = with_state(raw, TxState::Committed);
        assert_eq!(state(done), TxState::Committed);
        assert_eq!(incarnation(done), incarnation(raw));
        assert_ne!(done & IRREVOCABLE, 0);
    }

    #[test]
    fn test_flag_bits_disjoint() {
        assert_eq!(COMMITTING & KILLED, 0);
        assert_eq!(COMMITTING & IRREVOCABLE, 0);
        assert_eq!(KILLED & IRREVOCABLE, 0);
        assert_eq!((COMMITTING | KILLED | IRREVOCABLE) & STATE_MASK, 0);
    }

    #[test]
    fn test_running_states() {
        assert!(is_running(next_active(0)));
        assert!(is_running(next_active(0) | COMMITTING));
        assert!(!is_running(with_state(next_active(0), TxState::Aborted)));
        assert!(!is_running(0));
    }
}
