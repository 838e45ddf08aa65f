//! Word-granular addressing
//!
//! The engine operates on machine words, never on objects. An [`Addr`] is an
//! index into the runtime's [`WordHeap`](crate::heap::WordHeap); it is the
//! safe rendition of the raw word pointers the transactional API is defined
//! over. Addresses are dense, copyable and hashable, and many addresses may
//! alias to the same lock stripe.

use serde::{Deserialize, Serialize};

/// The unit of transactional access: one 64-bit machine word.
pub type Word = u64;

/// Largest version a lock word can carry before a coordinated clock
/// rollover is required. One bit of the lock word is reserved for the
/// ownership flag, so versions occupy the remaining 63 bits.
pub const VERSION_MAX: u64 = u64::MAX >> 1;

/// Index of a word in the transactional heap.
///
/// `Addr` is deliberately opaque: arithmetic goes through [`Addr::offset`]
/// so that out-of-range accesses are caught by the heap's bounds check
/// rather than wrapping silently.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Addr(usize);

impl Addr {
    /// Create an address from a raw word index.
    pub const fn new(index: usize) -> Self {
        Addr(index)
    }

    /// Raw word index.
    pub const fn index(self) -> usize {
        self.0
    }

    /// Address `n` words past this one.
    pub const fn offset(self, n: usize) -> Self {
        Addr(self.0 + n)
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Merge `value` into `current` under a byte-granular `mask`.
///
/// Bits set in `mask` come from `value`, the rest are preserved. A full
/// mask (`u64::MAX`) replaces the word outright.
#[inline]
pub fn merge_masked(current: Word, value: Word, mask: Word) -> Word {
    (current & !mask) | (value & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_offset() {
        let base = Addr::new(10);
        assert_eq!(base.offset(0), base);
        assert_eq!(base.offset(5).index(), 15);
    }

    #[test]
    fn test_addr_ordering() {
        assert!(Addr::new(1) < Addr::new(2));
        assert_eq!(Addr::new(7), Addr::new(7));
    }

    #[test]
    fn test_merge_full_mask() {
        assert_eq!(merge_masked(0xdead, 0xbeef, u64::MAX), 0xbeef);
    }

    #[test]
    fn test_merge_partial_mask() {
        // Low byte comes from the new value, the rest is preserved.
        assert_eq!(merge_masked(0x1122, 0x00ff, 0x00ff), 0x11ff);
        assert_eq!(merge_masked(0x1122, 0x0000, 0x00ff), 0x1100);
    }

    #[test]
    fn test_version_max_leaves_owned_bit() {
        // A version shifted left by one (to make room for the owned bit)
        // must still fit in the word.
        assert!(VERSION_MAX.checked_mul(2).is_some());
    }

    #[test]
    fn test_addr_display() {
        assert_eq!(Addr::new(42).to_string(), "w42");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_takes_each_bit_from_one_side(
                current in any::<u64>(),
                value in any::<u64>(),
                mask in any::<u64>(),
            ) {
                let merged = merge_masked(current, value, mask);
                prop_assert_eq!(merged & mask, value & mask);
                prop_assert_eq!(merged & !mask, current & !mask);
            }

            #[test]
            fn merge_is_idempotent(
                current in any::<u64>(),
                value in any::<u64>(),
                mask in any::<u64>(),
            ) {
                let once = merge_masked(current, value, mask);
                prop_assert_eq!(merge_masked(once, value, mask), once);
            }
        }
    }
}
