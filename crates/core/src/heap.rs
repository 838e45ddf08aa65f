//! Bounds-checked transactional word heap
//!
//! The original engine speculated over arbitrary process memory and relied
//! on a SIGSEGV handler to convert wild loads into rollbacks. Here the
//! transactional address space is a slab the runtime owns: every access is
//! bounds-checked, and an out-of-range [`Addr`] surfaces as
//! [`Error::Fault`] — recoverable inside a transaction (it aborts the
//! transaction), fatal outside one.
//!
//! # Thread Safety
//!
//! The heap is shared by every thread. Words are `AtomicU64`; transactional
//! code reads them with acquire ordering and writes them back with release
//! ordering so that lock-release publication (in `filament-locks`) makes
//! the written values visible.

use crate::error::{Error, Result};
use crate::word::{Addr, Word};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Fixed slab of transactional words.
pub struct WordHeap {
    words: Box<[AtomicU64]>,
    /// Bump allocator cursor for [`WordHeap::alloc`].
    next: AtomicUsize,
}

impl WordHeap {
    /// Allocate a zeroed heap of `size` words.
    pub fn new(size: usize) -> Self {
        let mut words = Vec::with_capacity(size);
        words.resize_with(size, || AtomicU64::new(0));
        WordHeap {
            words: words.into_boxed_slice(),
            next: AtomicUsize::new(0),
        }
    }

    /// Total number of words in the heap.
    pub fn size(&self) -> usize {
        self.words.len()
    }

    /// Number of words handed out by [`WordHeap::alloc`].
    pub fn allocated(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.words.len())
    }

    /// Bump-allocate a contiguous block of `count` words.
    ///
    /// Returns the address of the first word. Exhaustion is a setup-time
    /// error: workloads size the heap up front.
    pub fn alloc(&self, count: usize) -> Result<Addr> {
        let start = self.next.fetch_add(count, Ordering::Relaxed);
        if start + count > self.words.len() {
            return Err(Error::Capacity {
                resource: "word heap",
                limit: self.words.len(),
                requested: start + count,
            });
        }
        Ok(Addr::new(start))
    }

    /// Borrow the atomic cell backing `addr`.
    ///
    /// This is the access point for the engine's protocols, which pick
    /// their own memory orderings.
    #[inline]
    pub fn cell(&self, addr: Addr) -> Result<&AtomicU64> {
        self.words.get(addr.index()).ok_or(Error::Fault {
            addr: addr.index(),
            size: self.words.len(),
        })
    }

    /// Non-transactional read (acquire ordering).
    #[inline]
    pub fn read(&self, addr: Addr) -> Result<Word> {
        Ok(self.cell(addr)?.load(Ordering::Acquire))
    }

    /// Non-transactional write (release ordering).
    ///
    /// Only safe to use outside any transaction (initialization, or after
    /// shutdown); concurrent transactional writers are not coordinated
    /// with.
    #[inline]
    pub fn write(&self, addr: Addr, value: Word) -> Result<()> {
        self.cell(addr)?.store(value, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for WordHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordHeap")
            .field("size", &self.size())
            .field("allocated", &self.allocated())
            .finish()
    }
}
