//! The three commit-protocol designs
//!
//! Each submodule implements load, store and commit for one variant; the
//! engine dispatches on the configured [`DesignVariant`]. Rollback is
//! shared and lives on the engine, driven by the acquired flags and undo
//! log the protocols leave behind.
//!
//! All three share the same optimistic read: load the stripe word, load
//! the value, re-load the stripe word, and accept only if nothing moved
//! and the version fits the snapshot window. They differ in when stripe
//! locks are taken and when memory is mutated.
//!
//! [`DesignVariant`]: filament_core::DesignVariant

use crate::descriptor::TxDescriptor;
use crate::engine::{Engine, TxResult};
use crate::sets::{UndoEntry, WriteArena, WriteEntry, NO_ENTRY};
use crate::status::{self, COMMITTING};
use filament_core::word::merge_masked;
use filament_core::{AbortReason, Addr, ConflictKind, Word};
use filament_locks::LockWord;
use std::sync::atomic::Ordering;

/// Walk the stripe chain rooted at `head` for the entry covering `addr`.
fn find_in_chain(wset: &WriteArena, head: usize, addr: Addr) -> Option<&WriteEntry> {
    let mut idx = head;
    while idx != NO_ENTRY {
        let entry = wset.entry(idx)?;
        if entry.addr() == addr {
            return Some(entry);
        }
        idx = entry.next();
    }
    None
}

/// Last entry of the stripe chain rooted at `head`.
fn chain_tail(wset: &WriteArena, head: usize) -> &WriteEntry {
    let mut idx = head;
    loop {
        let entry = wset.entry_unchecked(idx);
        let next = entry.next();
        if next == NO_ENTRY {
            return entry;
        }
        idx = next;
    }
}

/// Apply every buffered write to memory. Locks are held, so plain stores
/// suffice; release ordering pairs with the subsequent lock release.
fn write_back(e: &Engine, wset: &WriteArena) {
    for entry in wset.iter() {
        // Address was bounds-checked when the entry was created.
        if let Ok(cell) = e.heap.cell(entry.addr()) {
            let mask = entry.mask();
            if mask == u64::MAX {
                cell.store(entry.value(), Ordering::Release);
            } else {
                let current = cell.load(Ordering::Acquire);
                cell.store(merge_masked(current, entry.value(), mask), Ordering::Release);
            }
        }
    }
}

/// Release every acquired stripe at version `t`.
fn release_all(e: &Engine, wset: &WriteArena, t: u64) {
    for entry in wset.iter() {
        if entry.is_acquired() {
            e.table.slot(entry.lock()).release(t);
        }
    }
}

/// Write-back, encounter-time locking.
///
/// Stores take the stripe lock eagerly and buffer the value; loads that
/// hit a foreign owner first try to read through it (the pre-acquisition
/// memory value at the owner's saved version) before invoking contention.
pub(crate) mod etl {
    use super::*;

    pub(crate) fn load(e: &Engine, tx: &mut TxDescriptor, addr: Addr) -> TxResult<Word> {
        let idx = e.table.index_of(addr);
        let stripe = e.table.slot(idx);
        let cell = e.heap.cell(addr).map_err(|_| AbortReason::Fault)?;
        loop {
            if tx.shared.is_killed() {
                return Err(AbortReason::Killed);
            }
            let l = stripe.read();
            if l.is_owned() {
                if l.owner_slot() == tx.slot() as usize {
                    let mem = cell.load(Ordering::Acquire);
                    let wset = tx.shared.wset();
                    return Ok(match find_in_chain(wset, l.entry_index(), addr) {
                        Some(entry) => merge_masked(mem, entry.value(), entry.mask()),
                        // Stripe locked for a different address; memory
                        // still holds the committed value.
                        None => mem,
                    });
                }
                if let Some((value, version)) = peek_owner(e, tx, idx, l, addr) {
                    tx.rset.push(idx, version);
                    let writes = tx.shared.wset().len() as u64;
                    tx.shared.publish_set_sizes(tx.rset.len() as u64, writes);
                    return Ok(value);
                }
                e.contend(tx, idx, l, ConflictKind::Load)?;
                continue;
            }
            let version = l.version();
            let value = cell.load(Ordering::Acquire);
            if stripe.read() != l {
                continue;
            }
            if version > tx.end {
                if !e.extend(tx) {
                    return Err(AbortReason::Validate);
                }
                continue;
            }
            tx.rset.push(idx, version);
            let writes = tx.shared.wset().len() as u64;
            tx.shared.publish_set_sizes(tx.rset.len() as u64, writes);
            return Ok(value);
        }
    }

    /// Read through a foreign owner without waiting.
    ///
    /// The owner buffers its writes, so memory still holds the committed
    /// value until its write-back, and the entry named by the lock word
    /// saved the stripe version it displaced. The read is valid when the
    /// owner's status word is bit-identical across the whole peek (same
    /// incarnation, still Active, not committing) and the lock word did
    /// not move.
    fn peek_owner(
        e: &Engine,
        tx: &TxDescriptor,
        idx: usize,
        l: LockWord,
        addr: Addr,
    ) -> Option<(Word, u64)> {
        let owner = e.registry.get(l.owner_slot() as u16)?;
        let raw = owner.status_raw();
        if !status::is_running(raw) || raw & COMMITTING != 0 {
            return None;
        }
        let entry = owner.wset().entry(l.entry_index())?;
        if entry.lock() != idx || !entry.is_acquired() {
            return None;
        }
        let version = entry.version();
        if version > tx.end {
            return None;
        }
        let cell = e.heap.cell(addr).ok()?;
        let value = cell.load(Ordering::Acquire);
        if owner.status_raw() != raw || e.table.slot(idx).read() != l {
            return None;
        }
        Some((value, version))
    }

    pub(crate) fn store(
        e: &Engine,
        tx: &mut TxDescriptor,
        addr: Addr,
        value: Word,
        mask: Word,
    ) -> TxResult<()> {
        let idx = e.table.index_of(addr);
        let stripe = e.table.slot(idx);
        e.heap.cell(addr).map_err(|_| AbortReason::Fault)?;
        loop {
            if tx.shared.is_killed() {
                return Err(AbortReason::Killed);
            }
            let l = stripe.read();
            if l.is_owned() {
                if l.owner_slot() == tx.slot() as usize {
                    let wset = tx.shared.wset();
                    match find_in_chain(wset, l.entry_index(), addr) {
                        Some(entry) => entry.merge(value, mask),
                        None => {
                            let new = wset.push(addr, value, mask, idx);
                            chain_tail(wset, l.entry_index()).set_next(new);
                        }
                    }
                    let writes = tx.shared.wset().len() as u64;
                    tx.shared.publish_set_sizes(tx.rset.len() as u64, writes);
                    return Ok(());
                }
                e.contend(tx, idx, l, ConflictKind::Store)?;
                continue;
            }
            let version = l.version();
            if version > tx.end {
                if !e.extend(tx) {
                    return Err(AbortReason::Validate);
                }
                continue;
            }
            // Entry must be fully initialized (including the displaced
            // version) before the CAS publishes its index to peekers.
            let new = tx.shared.wset().push(addr, value, mask, idx);
            tx.shared.wset().entry_unchecked(new).mark_acquired(version);
            if !stripe.try_acquire(l, LockWord::owned_by(tx.slot() as usize, new)) {
                tx.shared.wset().pop();
                continue;
            }
            let writes = tx.shared.wset().len() as u64;
            tx.shared.publish_set_sizes(tx.rset.len() as u64, writes);
            return Ok(());
        }
    }

    /// Returns the commit timestamp, zero for a read-only commit.
    pub(crate) fn commit(e: &Engine, tx: &mut TxDescriptor) -> TxResult<u64> {
        if tx.shared.wset().is_empty() {
            // Read-only: the snapshot was kept consistent all along.
            return Ok(0);
        }
        if !tx.shared.begin_commit() {
            return Err(AbortReason::Killed);
        }
        let t = e.clock.fetch_inc();
        if t != tx.end + 1 && !e.validate(tx) {
            // Rollback releases the stripes at their saved versions.
            return Err(AbortReason::Validate);
        }
        write_back(e, tx.shared.wset());
        release_all(e, tx.shared.wset(), t);
        Ok(t)
    }
}

/// Write-back, commit-time locking.
///
/// Stores only buffer; no lock is held during execution, so loads never
/// meet an owner outside someone's commit window. Commit acquires every
/// written stripe, validates, writes back and releases.
pub(crate) mod ctl {
    use super::*;

    pub(crate) fn load(e: &Engine, tx: &mut TxDescriptor, addr: Addr) -> TxResult<Word> {
        let idx = e.table.index_of(addr);
        let stripe = e.table.slot(idx);
        let cell = e.heap.cell(addr).map_err(|_| AbortReason::Fault)?;
        loop {
            if tx.shared.is_killed() {
                return Err(AbortReason::Killed);
            }
            let l = stripe.read();
            if l.is_owned() {
                // Owners only exist inside a commit window; arbitrate.
                e.contend(tx, idx, l, ConflictKind::Load)?;
                continue;
            }
            let version = l.version();
            let value = cell.load(Ordering::Acquire);
            if stripe.read() != l {
                continue;
            }
            if version > tx.end {
                if !e.extend(tx) {
                    return Err(AbortReason::Validate);
                }
                continue;
            }
            tx.rset.push(idx, version);
            let writes = tx.shared.wset().len() as u64;
            tx.shared.publish_set_sizes(tx.rset.len() as u64, writes);
            // Overlay our own buffered write, if any.
            return Ok(match tx.shared.wset().find(addr) {
                Some(entry) => merge_masked(value, entry.value(), entry.mask()),
                None => value,
            });
        }
    }

    pub(crate) fn store(
        e: &Engine,
        tx: &mut TxDescriptor,
        addr: Addr,
        value: Word,
        mask: Word,
    ) -> TxResult<()> {
        e.heap.cell(addr).map_err(|_| AbortReason::Fault)?;
        let idx = e.table.index_of(addr);
        let wset = tx.shared.wset();
        match wset.find(addr) {
            Some(entry) => entry.merge(value, mask),
            None => {
                wset.push(addr, value, mask, idx);
            }
        }
        let writes = tx.shared.wset().len() as u64;
        tx.shared.publish_set_sizes(tx.rset.len() as u64, writes);
        Ok(())
    }

    pub(crate) fn commit(e: &Engine, tx: &mut TxDescriptor) -> TxResult<u64> {
        if tx.shared.wset().is_empty() {
            return Ok(0);
        }
        if !tx.shared.begin_commit() {
            return Err(AbortReason::Killed);
        }
        // Acquire every written stripe. A stripe shared by several
        // entries is taken once, by the first entry that reaches it.
        // Never wait on a foreign owner here: two committers acquiring
        // overlapping stripes in opposite orders must not block each
        // other, so losing a stripe aborts this attempt with backoff.
        let len = tx.shared.wset().len();
        for i in 0..len {
            let idx = tx.shared.wset().entry_unchecked(i).lock();
            let stripe = e.table.slot(idx);
            loop {
                let l = stripe.read();
                if l.is_owned() {
                    if l.owner_slot() == tx.slot() as usize {
                        break;
                    }
                    tx.losses += 1;
                    tx.backoff = Some(crate::cm::backoff_for(tx.losses));
                    return Err(AbortReason::Conflict(ConflictKind::Store));
                }
                if stripe.try_acquire(l, LockWord::owned_by(tx.slot() as usize, i)) {
                    // No peek can resolve this entry (the committing flag
                    // is up), so marking after the CAS is safe.
                    tx.shared.wset().entry_unchecked(i).mark_acquired(l.version());
                    break;
                }
            }
        }
        let t = e.clock.fetch_inc();
        if t != tx.end + 1 && !e.validate(tx) {
            return Err(AbortReason::Validate);
        }
        write_back(e, tx.shared.wset());
        release_all(e, tx.shared.wset(), t);
        Ok(t)
    }
}

/// Write-through with undo logging.
///
/// Stores take the stripe lock eagerly and mutate memory in place,
/// recording the previous value. Commit only validates and releases;
/// rollback replays the undo log in reverse.
pub(crate) mod wt {
    use super::*;

    pub(crate) fn load(e: &Engine, tx: &mut TxDescriptor, addr: Addr) -> TxResult<Word> {
        let idx = e.table.index_of(addr);
        let stripe = e.table.slot(idx);
        let cell = e.heap.cell(addr).map_err(|_| AbortReason::Fault)?;
        loop {
            if tx.shared.is_killed() {
                return Err(AbortReason::Killed);
            }
            let l = stripe.read();
            if l.is_owned() {
                if l.owner_slot() == tx.slot() as usize {
                    // We hold the stripe; memory is ours until release.
                    return Ok(cell.load(Ordering::Acquire));
                }
                e.contend(tx, idx, l, ConflictKind::Load)?;
                continue;
            }
            let version = l.version();
            let value = cell.load(Ordering::Acquire);
            if stripe.read() != l {
                continue;
            }
            if version > tx.end {
                if !e.extend(tx) {
                    return Err(AbortReason::Validate);
                }
                continue;
            }
            tx.rset.push(idx, version);
            tx.shared
                .publish_set_sizes(tx.rset.len() as u64, tx.undo.len() as u64);
            return Ok(value);
        }
    }

    pub(crate) fn store(
        e: &Engine,
        tx: &mut TxDescriptor,
        addr: Addr,
        value: Word,
        mask: Word,
    ) -> TxResult<()> {
        let idx = e.table.index_of(addr);
        let stripe = e.table.slot(idx);
        let cell = e.heap.cell(addr).map_err(|_| AbortReason::Fault)?;
        loop {
            if tx.shared.is_killed() {
                return Err(AbortReason::Killed);
            }
            let l = stripe.read();
            if l.is_owned() {
                if l.owner_slot() != tx.slot() as usize {
                    e.contend(tx, idx, l, ConflictKind::Store)?;
                    continue;
                }
            } else {
                let version = l.version();
                if version > tx.end {
                    if !e.extend(tx) {
                        return Err(AbortReason::Validate);
                    }
                    continue;
                }
                // The entry index has no meaning in this design; writes
                // go straight to memory and readers cannot peek.
                let word = LockWord::owned_by(tx.slot() as usize, tx.wt_locks.len());
                if !stripe.try_acquire(l, word) {
                    continue;
                }
                tx.wt_locks.push((idx, version));
            }
            let prev = cell.load(Ordering::Acquire);
            tx.undo.push(UndoEntry { addr, prev });
            cell.store(merge_masked(prev, value, mask), Ordering::Release);
            tx.shared
                .publish_set_sizes(tx.rset.len() as u64, tx.undo.len() as u64);
            return Ok(());
        }
    }

    pub(crate) fn commit(e: &Engine, tx: &mut TxDescriptor) -> TxResult<u64> {
        if tx.wt_locks.is_empty() {
            return Ok(0);
        }
        if !tx.shared.begin_commit() {
            return Err(AbortReason::Killed);
        }
        let t = e.clock.fetch_inc();
        if t != tx.end + 1 && !e.validate(tx) {
            // Rollback replays the undo log and restores versions.
            return Err(AbortReason::Validate);
        }
        for &(idx, _) in &tx.wt_locks {
            e.table.slot(idx).release(t);
        }
        // Memory is already current; nothing to undo after this point.
        tx.undo.clear();
        tx.wt_locks.clear();
        Ok(t)
    }
}
