//! Lock-word bit packing
//!
//! One 64-bit word per lock stripe:
//!
//! ```text
//! unowned:  [ version:63                          | owned:0 ]
//! owned:    [ entry index:47 | owner slot:16      | owned:1 ]
//! ```
//!
//! When owned, the word names the owning thread's registry slot and the
//! index of the head write-set entry chained under this lock, so that a
//! concurrent reader can locate the owner's pending value (read-from-owner)
//! and the contention manager can find the owner's descriptor.

/// Number of bits reserved for the owner's registry slot.
const SLOT_BITS: u32 = 16;
const OWNED_BIT: u64 = 1;
const SLOT_SHIFT: u32 = 1;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;
const ENTRY_SHIFT: u32 = SLOT_SHIFT + SLOT_BITS;

/// Decoded view of one lock-table word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockWord(u64);

impl LockWord {
    /// Version zero, unowned. The state of every lock at startup and
    /// after a clock rollover.
    pub const UNLOCKED: LockWord = LockWord(0);

    /// Largest write-set entry index representable in an owned word.
    pub const ENTRY_MAX: usize = (u64::MAX >> ENTRY_SHIFT) as usize;

    /// Rebuild from a raw atomic load.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        LockWord(raw)
    }

    /// Raw representation for CAS/store.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// An unowned word carrying `version`.
    #[inline]
    pub const fn versioned(version: u64) -> Self {
        LockWord(version << 1)
    }

    /// An owned word naming the owner's slot and head entry index.
    #[inline]
    pub const fn owned_by(slot: usize, entry: usize) -> Self {
        LockWord(
            OWNED_BIT | ((slot as u64 & SLOT_MASK) << SLOT_SHIFT) | ((entry as u64) << ENTRY_SHIFT),
        )
    }

    /// Whether some transaction currently owns this lock.
    #[inline]
    pub const fn is_owned(self) -> bool {
        self.0 & OWNED_BIT != 0
    }

    /// Version carried by an unowned word.
    #[inline]
    pub const fn version(self) -> u64 {
        self.0 >> 1
    }

    /// Registry slot of the owner. Meaningful only when owned.
    #[inline]
    pub const fn owner_slot(self) -> usize {
        ((self.0 >> SLOT_SHIFT) & SLOT_MASK) as usize
    }

    /// Head write-set entry index of the owner. Meaningful only when owned.
    #[inline]
    pub const fn entry_index(self) -> usize {
        (self.0 >> ENTRY_SHIFT) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert;

    // Slot and entry fields plus the owned bit fill the word exactly.
    const_assert!(SLOT_BITS + 47 + 1 == 64);

    #[test]
    fn test_versioned_roundtrip() {
        for v in [0u64, 1, 42, filament_core::VERSION_MAX] {
            let w = LockWord::versioned(v);
            assert!(!w.is_owned());
            assert_eq!(w.version(), v);
        }
    }

    #[test]
    fn test_owned_roundtrip() {
        let w = LockWord::owned_by(513, 77_000);
        assert!(w.is_owned());
        assert_eq!(w.owner_slot(), 513);
        assert_eq!(w.entry_index(), 77_000);
    }

    #[test]
    fn test_owned_max_fields() {
        let w = LockWord::owned_by(u16::MAX as usize, LockWord::ENTRY_MAX);
        assert!(w.is_owned());
        assert_eq!(w.owner_slot(), u16::MAX as usize);
        assert_eq!(w.entry_index(), LockWord::ENTRY_MAX);
    }

    #[test]
    fn test_unlocked_is_version_zero() {
        assert!(!LockWord::UNLOCKED.is_owned());
        assert_eq!(LockWord::UNLOCKED.version(), 0);
    }

    #[test]
    fn test_owned_and_versioned_never_collide() {
        // The owned bit separates the two encodings for any payload.
        let owned = LockWord::owned_by(0, 0);
        let free = LockWord::versioned(0);
        assert_ne!(owned.raw() & 1, free.raw() & 1);
    }
}
