//! Process-wide descriptor registry
//!
//! Owned lock words name their owner by slot number, so every thread that
//! runs transactions must hold a stable slot for its whole lifetime. Slots
//! are lazily created, recycled when a thread detaches, and never
//! deallocated: a peeker racing a detach still reads a valid (if stale)
//! descriptor, and the status-word incarnation exposes the staleness.

use crate::shared::TxShared;
use filament_core::{Error, Result};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Slot registry for shared descriptor halves.
pub struct Registry {
    slots: Box<[OnceCell<Arc<TxShared>>]>,
    in_use: Box<[AtomicBool]>,
    attached: AtomicUsize,
    set_capacity: usize,
    max_levels: usize,
}

impl Registry {
    /// A registry with `max_threads` slots.
    pub fn new(max_threads: usize, set_capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(max_threads);
        slots.resize_with(max_threads, OnceCell::new);
        let mut in_use = Vec::with_capacity(max_threads);
        in_use.resize_with(max_threads, || AtomicBool::new(false));
        Registry {
            slots: slots.into_boxed_slice(),
            in_use: in_use.into_boxed_slice(),
            attached: AtomicUsize::new(0),
            set_capacity,
            max_levels: max_threads,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Threads currently attached.
    #[inline]
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Claim a free slot and return its shared descriptor. Fails when all
    /// slots are taken.
    pub fn attach(&self) -> Result<Arc<TxShared>> {
        for (i, flag) in self.in_use.iter().enumerate() {
            if flag
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let shared = self.slots[i].get_or_init(|| {
                    Arc::new(TxShared::new(i as u16, self.set_capacity, self.max_levels))
                });
                self.attached.fetch_add(1, Ordering::AcqRel);
                return Ok(Arc::clone(shared));
            }
        }
        Err(Error::Capacity {
            resource: "thread slots",
            limit: self.slots.len(),
            requested: self.slots.len() + 1,
        })
    }

    /// Release a slot for reuse. The descriptor itself stays allocated.
    pub fn detach(&self, slot: u16) {
        let slot = slot as usize;
        debug_assert!(self.in_use[slot].load(Ordering::Relaxed));
        self.attached.fetch_sub(1, Ordering::AcqRel);
        self.in_use[slot].store(false, Ordering::Release);
    }

    /// Shared descriptor for `slot`, if one was ever created. Used by the
    /// peek path to resolve the owner named in a lock word.
    #[inline]
    pub fn get(&self, slot: u16) -> Option<&Arc<TxShared>> {
        self.slots.get(slot as usize).and_then(|c| c.get())
    }

    /// Iterate every descriptor ever created, attached or not. Quiescence
    /// and statistics both want the superset: a detached descriptor is
    /// Inactive and sums correctly.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TxShared>> {
        self.slots.iter().filter_map(|c| c.get())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("capacity", &self.capacity())
            .field("attached", &self.attached())
            .finish()
    }
}
