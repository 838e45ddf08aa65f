//! The striped lock array
//!
//! Fixed power-of-two array of atomic lock words, indexed by a
//! deterministic hash of the word address. Many addresses alias to one
//! stripe; the engine only ever relies on "same address, same stripe".

use crate::word::LockWord;
use filament_core::Addr;
use std::sync::atomic::{AtomicU64, Ordering};

/// One lock stripe.
pub struct LockSlot {
    word: AtomicU64,
}

impl LockSlot {
    fn new() -> Self {
        LockSlot {
            word: AtomicU64::new(LockWord::UNLOCKED.raw()),
        }
    }

    /// Current lock word (acquire ordering: pairs with [`LockSlot::release`]).
    #[inline]
    pub fn read(&self) -> LockWord {
        LockWord::from_raw(self.word.load(Ordering::Acquire))
    }

    /// Atomically transition `expected` (unowned, known version) to
    /// `owner`. Fails if the slot changed underneath.
    #[inline]
    pub fn try_acquire(&self, expected: LockWord, owner: LockWord) -> bool {
        self.word
            .compare_exchange(
                expected.raw(),
                owner.raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Clear ownership and publish `version`.
    ///
    /// Release ordering: a reader that observes the new version also
    /// observes every write-back that preceded this release.
    #[inline]
    pub fn release(&self, version: u64) {
        self.word
            .store(LockWord::versioned(version).raw(), Ordering::Release);
    }

    /// Unconditional reset. Only valid inside the quiescence barrier,
    /// when no transaction is active.
    pub(crate) fn reset(&self) {
        self.word.store(LockWord::UNLOCKED.raw(), Ordering::Release);
    }
}

impl std::fmt::Debug for LockSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let w = self.read();
        if w.is_owned() {
            write!(
                f,
                "LockSlot(owned by slot {}, entry {})",
                w.owner_slot(),
                w.entry_index()
            )
        } else {
            write!(f, "LockSlot(version {})", w.version())
        }
    }
}

/// The process-wide lock table.
pub struct LockTable {
    slots: Box<[LockSlot]>,
    mask: usize,
}

impl LockTable {
    /// Build a table of `1 << bits` stripes.
    pub fn new(bits: u32) -> Self {
        let len = 1usize << bits;
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, LockSlot::new);
        LockTable {
            slots: slots.into_boxed_slice(),
            mask: len - 1,
        }
    }

    /// Number of stripes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table is empty (never true for a constructed table).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stripe index for an address. Deterministic: the same address always
    /// maps to the same stripe.
    #[inline]
    pub fn index_of(&self, addr: Addr) -> usize {
        addr.index() & self.mask
    }

    /// Stripe by index.
    #[inline]
    pub fn slot(&self, index: usize) -> &LockSlot {
        &self.slots[index]
    }

    /// Stripe for an address.
    #[inline]
    pub fn slot_for(&self, addr: Addr) -> &LockSlot {
        &self.slots[self.index_of(addr)]
    }

    /// Reset every stripe to version zero. Only valid inside the
    /// quiescence barrier (clock rollover).
    pub fn reset_versions(&self) {
        for slot in self.slots.iter() {
            slot.reset();
        }
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("stripes", &self.len())
            .finish()
    }
}
