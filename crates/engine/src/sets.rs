//! Read, write and undo sets
//!
//! The read set and undo log are strictly thread-private. The write set is
//! not: in the encounter-time design an owned lock word names a write-set
//! entry, and concurrent readers resolve it to find the stripe's saved
//! version (the read-from-owner path). Write-set entries therefore live in
//! a chunk ladder that never moves an entry once published, with atomic
//! fields, so a cross-thread peek is a plain data read guarded by the
//! owner's status word.

use filament_core::{Addr, Word};
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Sentinel for "no next entry" in a per-stripe chain.
pub const NO_ENTRY: usize = usize::MAX;

/// One observed read: the lock stripe and the version it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadEntry {
    /// Lock-table stripe index.
    pub lock: usize,
    /// Version observed when the value was read.
    pub version: u64,
}

/// The read set. Insertion order is irrelevant to correctness; capacity
/// grows dynamically.
#[derive(Debug, Default)]
pub struct ReadSet {
    entries: SmallVec<[ReadEntry; 16]>,
}

impl ReadSet {
    /// A read set with room for `capacity` entries before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        ReadSet {
            entries: SmallVec::with_capacity(capacity),
        }
    }

    /// Record an observation.
    #[inline]
    pub fn push(&mut self, lock: usize, version: u64) {
        self.entries.push(ReadEntry { lock, version });
    }

    /// Number of recorded reads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no reads were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over recorded reads.
    pub fn iter(&self) -> impl Iterator<Item = &ReadEntry> {
        self.entries.iter()
    }

    /// Discard all entries, keeping capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One buffered (or, for write-through, performed) write.
///
/// All fields are atomic so a concurrent peek is race-free; only the
/// owning thread ever writes them. `version` is the stripe version
/// observed when the entry's lock was acquired (restored on abort),
/// `next` chains entries that share a stripe, `acquired` marks the entry
/// that performed the acquisition and is responsible for the release.
pub struct WriteEntry {
    addr: AtomicUsize,
    value: AtomicU64,
    mask: AtomicU64,
    version: AtomicU64,
    lock: AtomicUsize,
    next: AtomicUsize,
    acquired: AtomicBool,
}

impl WriteEntry {
    fn vacant() -> Self {
        WriteEntry {
            addr: AtomicUsize::new(0),
            value: AtomicU64::new(0),
            mask: AtomicU64::new(0),
            version: AtomicU64::new(0),
            lock: AtomicUsize::new(0),
            next: AtomicUsize::new(NO_ENTRY),
            acquired: AtomicBool::new(false),
        }
    }

    /// Word address this entry writes.
    #[inline]
    pub fn addr(&self) -> Addr {
        Addr::new(self.addr.load(Ordering::Relaxed))
    }

    /// Pending value.
    #[inline]
    pub fn value(&self) -> Word {
        self.value.load(Ordering::Relaxed)
    }

    /// Byte mask of the pending value.
    #[inline]
    pub fn mask(&self) -> Word {
        self.mask.load(Ordering::Relaxed)
    }

    /// Stripe version observed at acquisition.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Lock-table stripe index.
    #[inline]
    pub fn lock(&self) -> usize {
        self.lock.load(Ordering::Relaxed)
    }

    /// Next entry chained under the same stripe, or [`NO_ENTRY`].
    #[inline]
    pub fn next(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    /// Whether this entry performed the stripe acquisition.
    #[inline]
    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Merge another store into this entry (last-write-wins per address).
    #[inline]
    pub fn merge(&self, value: Word, mask: Word) {
        let merged =
            filament_core::word::merge_masked(self.value.load(Ordering::Relaxed), value, mask);
        self.value.store(merged, Ordering::Relaxed);
        self.mask
            .store(self.mask.load(Ordering::Relaxed) | mask, Ordering::Relaxed);
    }

    /// Chain `idx` after this entry. Owner-only.
    #[inline]
    pub fn set_next(&self, idx: usize) {
        self.next.store(idx, Ordering::Release);
    }

    /// Mark this entry as the stripe acquirer and remember the displaced
    /// version. Owner-only.
    #[inline]
    pub fn mark_acquired(&self, version: u64) {
        self.version.store(version, Ordering::Relaxed);
        self.acquired.store(true, Ordering::Relaxed);
    }
}

/// Number of chunk rungs; rung `i` holds `base << i` entries, so 32 rungs
/// cover any realistic write set.
const RUNGS: usize = 32;

/// Append-only arena of write entries that never moves an entry.
///
/// Entries are allocated in geometrically growing chunks; an index maps to
/// a (rung, offset) pair with bit arithmetic. Published entries stay valid
/// for the life of the descriptor, which is what makes the lock word's
/// entry-index reference and the peek path sound.
pub struct WriteArena {
    base: usize,
    base_log: u32,
    chunks: Box<[OnceCell<Box<[WriteEntry]>>]>,
    len: AtomicUsize,
}

impl WriteArena {
    /// An arena whose first chunk holds at least `initial_capacity`
    /// entries.
    pub fn new(initial_capacity: usize) -> Self {
        let base = initial_capacity.next_power_of_two().max(8);
        let mut chunks = Vec::with_capacity(RUNGS);
        chunks.resize_with(RUNGS, OnceCell::new);
        WriteArena {
            base,
            base_log: base.trailing_zeros(),
            chunks: chunks.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    /// Entries currently in use.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the arena holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map an entry index to its rung and offset.
    #[inline]
    fn locate(&self, idx: usize) -> (usize, usize) {
        // Rung i starts at base * (2^i - 1) and holds base << i entries.
        let q = (idx >> self.base_log) + 1;
        let rung = (usize::BITS - 1 - q.leading_zeros()) as usize;
        let start = self.base * ((1 << rung) - 1);
        (rung, idx - start)
    }

    /// Entry by index, if it has been published. Safe for cross-thread
    /// peeks; the caller is responsible for the status-word guard.
    #[inline]
    pub fn entry(&self, idx: usize) -> Option<&WriteEntry> {
        if idx >= self.len() {
            return None;
        }
        let (rung, offset) = self.locate(idx);
        self.chunks[rung].get().and_then(|c| c.get(offset))
    }

    /// Entry by index without the length check. Owner-only, for indexes
    /// the owner knows are live.
    #[inline]
    pub fn entry_unchecked(&self, idx: usize) -> &WriteEntry {
        let (rung, offset) = self.locate(idx);
        &self.chunks[rung].get().expect("arena rung allocated")[offset]
    }

    /// Append an entry and return its index. Owner-only. The entry is
    /// fully initialized before the length publishes it.
    pub fn push(&self, addr: Addr, value: Word, mask: Word, lock: usize) -> usize {
        let idx = self.len.load(Ordering::Relaxed);
        let (rung, offset) = self.locate(idx);
        let chunk = self.chunks[rung].get_or_init(|| {
            let size = self.base << rung;
            let mut v = Vec::with_capacity(size);
            v.resize_with(size, WriteEntry::vacant);
            v.into_boxed_slice()
        });
        let entry = &chunk[offset];
        entry.addr.store(addr.index(), Ordering::Relaxed);
        entry.value.store(value, Ordering::Relaxed);
        entry.mask.store(mask, Ordering::Relaxed);
        entry.version.store(0, Ordering::Relaxed);
        entry.lock.store(lock, Ordering::Relaxed);
        entry.next.store(NO_ENTRY, Ordering::Relaxed);
        entry.acquired.store(false, Ordering::Relaxed);
        self.len.store(idx + 1, Ordering::Release);
        idx
    }

    /// Drop the most recent entry (failed lock acquisition). Owner-only.
    pub fn pop(&self) {
        let len = self.len.load(Ordering::Relaxed);
        debug_assert!(len > 0);
        self.len.store(len - 1, Ordering::Release);
    }

    /// Discard all entries. Owner-only; stale peeks are fenced off by the
    /// owner's status-word incarnation.
    pub fn clear(&self) {
        self.len.store(0, Ordering::Release);
    }

    /// Iterate live entries in program order. Owner-only.
    pub fn iter(&self) -> impl Iterator<Item = &WriteEntry> {
        (0..self.len()).map(move |i| self.entry_unchecked(i))
    }

    /// Find the live entry for `addr`, scanning program order. Owner-only.
    pub fn find(&self, addr: Addr) -> Option<&WriteEntry> {
        self.iter().find(|e| e.addr() == addr)
    }
}

impl std::fmt::Debug for WriteArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteArena")
            .field("len", &self.len())
            .field("base", &self.base)
            .finish()
    }
}

/// One undo record for the write-through design.
#[derive(Debug, Clone, Copy)]
pub struct UndoEntry {
    /// Word that was overwritten.
    pub addr: Addr,
    /// Its value before the transaction touched it.
    pub prev: Word,
}
