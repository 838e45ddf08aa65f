//! The transaction engine
//!
//! One [`Engine`] per runtime. It owns the heap, clock, lock table,
//! descriptor registry and quiescence gate, and implements everything the
//! design variants share: begin/commit/rollback orchestration, read-set
//! validation and snapshot extension, contention arbitration, clock
//! rollover and irrevocable execution. The per-design load/store/commit
//! protocols live in the private `designs` module.
//!
//! # Thread Safety
//!
//! All methods take `&self`; per-transaction mutability goes through the
//! caller's `&mut TxDescriptor`. A descriptor must only ever be driven by
//! the thread that entered it.

use crate::callbacks::CallbackRegistry;
use crate::cm::{self, Victim};
use crate::descriptor::{TxAttributes, TxDescriptor};
use crate::designs;
use crate::quiesce::Quiesce;
use crate::registry::Registry;
use crate::stats::GlobalStats;
use crate::status::{self, TxState, COMMITTING, IRREVOCABLE};
use filament_core::{
    AbortReason, Addr, CommitRecord, Config, ConflictKind, DesignVariant, Result, Word, WordHeap,
};
use filament_locks::{GlobalClock, LockTable, LockWord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Result of a transactional operation: `Err` means the current attempt
/// must roll back for the given reason.
pub type TxResult<T> = std::result::Result<T, AbortReason>;

/// The shared engine behind every transactional thread.
pub struct Engine {
    pub(crate) cfg: Config,
    pub(crate) heap: WordHeap,
    pub(crate) clock: GlobalClock,
    pub(crate) table: LockTable,
    pub(crate) registry: Registry,
    pub(crate) quiesce: Quiesce,
    callbacks: CallbackRegistry,
    /// At most one irrevocable transaction at a time.
    irrevocable: AtomicBool,
    epoch: Instant,
}

impl Engine {
    /// Build an engine from a validated configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        info!(
            design = cfg.design.name(),
            contention = cfg.contention.name(),
            heap_words = cfg.heap_words,
            lock_bits = cfg.lock_bits,
            "engine starting"
        );
        Ok(Engine {
            heap: WordHeap::new(cfg.heap_words),
            clock: GlobalClock::new(),
            table: LockTable::new(cfg.lock_bits),
            registry: Registry::new(cfg.max_threads, cfg.initial_set_capacity),
            quiesce: Quiesce::new(),
            callbacks: CallbackRegistry::new(),
            irrevocable: AtomicBool::new(false),
            epoch: Instant::now(),
            cfg,
        })
    }

    /// The configuration this engine was built from.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The transactional word heap.
    #[inline]
    pub fn heap(&self) -> &WordHeap {
        &self.heap
    }

    /// The descriptor registry.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The callback registry. Registration is only possible before the
    /// first thread attaches.
    #[inline]
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Current global clock value.
    #[inline]
    pub fn clock_now(&self) -> u64 {
        self.clock.get()
    }

    /// Nanoseconds since this engine was built (monotonic).
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Attach the calling thread. Seals the callback tables and claims a
    /// registry slot for the life of the returned descriptor.
    pub fn thread_enter(&self) -> Result<TxDescriptor> {
        self.callbacks.seal();
        let shared = self.registry.attach()?;
        self.callbacks.fire_thread_enter(shared.slot());
        Ok(TxDescriptor::new(shared, self.cfg.initial_set_capacity))
    }

    /// Detach a thread and recycle its slot.
    pub fn thread_exit(&self, tx: &TxDescriptor) {
        self.callbacks.fire_thread_exit(tx.slot());
        self.registry.detach(tx.slot());
    }

    /// Begin an attempt. `level` is the concurrency level observed by the
    /// caller (admitted transactions, or attached threads without a
    /// scheduler); it feeds work accounting only.
    ///
    /// Nested begins are flattened: only the outermost does real work.
    pub fn begin(&self, tx: &mut TxDescriptor, attr: TxAttributes, level: usize) {
        if tx.nesting > 0 {
            tx.nesting += 1;
            return;
        }

        if let Some(backoff) = tx.backoff.take() {
            std::thread::sleep(backoff);
        }
        if let Some(idx) = tx.wait_lock.take() {
            // The delay policy asked us to wait for the conflicting
            // stripe to be released before running again.
            while self.table.slot(idx).read().is_owned() && !self.quiesce.halt_requested() {
                std::hint::spin_loop();
                std::thread::yield_now();
            }
        }

        // Publish Active before checking the halt flag; see the quiesce
        // module for why this ordering closes the begin-gate race.
        loop {
            tx.shared.begin_active();
            if self.quiesce.halt_requested() {
                tx.shared.set_state(TxState::Inactive);
                self.quiesce.wait_open();
                continue;
            }
            break;
        }

        tx.attr = attr;
        tx.nesting = 1;
        tx.level = level;
        tx.reset_attempt();
        let now = self.clock.get();
        tx.start = now;
        tx.end = now;
        tx.shared.set_start(now);
        self.callbacks.fire_tx_begin(tx.slot());
    }

    /// Transactional load.
    pub fn load(&self, tx: &mut TxDescriptor, addr: Addr) -> TxResult<Word> {
        if tx.shared.is_killed() {
            return Err(AbortReason::Killed);
        }
        match self.cfg.design {
            DesignVariant::WriteBackEtl => designs::etl::load(self, tx, addr),
            DesignVariant::WriteBackCtl => designs::ctl::load(self, tx, addr),
            DesignVariant::WriteThrough => designs::wt::load(self, tx, addr),
        }
    }

    /// Transactional full-word store.
    pub fn store(&self, tx: &mut TxDescriptor, addr: Addr, value: Word) -> TxResult<()> {
        self.store_masked(tx, addr, value, u64::MAX)
    }

    /// Transactional store of the bytes selected by `mask`.
    pub fn store_masked(
        &self,
        tx: &mut TxDescriptor,
        addr: Addr,
        value: Word,
        mask: Word,
    ) -> TxResult<()> {
        if tx.shared.is_killed() {
            return Err(AbortReason::Killed);
        }
        match self.cfg.design {
            DesignVariant::WriteBackEtl => designs::etl::store(self, tx, addr, value, mask),
            DesignVariant::WriteBackCtl => designs::ctl::store(self, tx, addr, value, mask),
            DesignVariant::WriteThrough => designs::wt::store(self, tx, addr, value, mask),
        }
    }

    /// Commit the current attempt. Nested commits only pop the flat
    /// nesting counter; the outermost runs the design's commit protocol.
    pub fn commit(&self, tx: &mut TxDescriptor) -> TxResult<()> {
        if tx.nesting > 1 {
            tx.nesting -= 1;
            return Ok(());
        }
        if tx.shared.is_killed() {
            return Err(AbortReason::Killed);
        }
        let t = match self.cfg.design {
            DesignVariant::WriteBackEtl => designs::etl::commit(self, tx)?,
            DesignVariant::WriteBackCtl => designs::ctl::commit(self, tx)?,
            DesignVariant::WriteThrough => designs::wt::commit(self, tx)?,
        };

        let end_ns = self.now_ns();
        let duration = tx.attempt_ns();
        tx.shared.stats().on_commit(duration, tx.level);
        tx.shared.push_commit_record(CommitRecord {
            start_ns: end_ns.saturating_sub(duration),
            end_ns,
            level: tx.level,
        });
        tx.shared.set_state(TxState::Committed);
        self.callbacks.fire_tx_commit(tx.slot());
        self.finish_exclusive(tx);
        tx.shared.set_state(TxState::Inactive);
        tx.nesting = 0;
        tx.losses = 0;
        tx.backoff = None;
        tx.wait_lock = None;

        if t >= self.cfg.version_max {
            self.rollover(tx);
        }
        Ok(())
    }

    /// Roll the current attempt back: release or undo per design, account
    /// the wasted work, fire hooks, return the descriptor to Inactive.
    pub fn rollback(&self, tx: &mut TxDescriptor, reason: AbortReason) {
        match self.cfg.design {
            DesignVariant::WriteBackEtl | DesignVariant::WriteBackCtl => {
                for entry in tx.shared.wset().iter() {
                    if entry.is_acquired() {
                        self.table.slot(entry.lock()).release(entry.version());
                    }
                }
            }
            DesignVariant::WriteThrough => {
                for undo in tx.undo.iter().rev() {
                    // Address was bounds-checked when the write happened.
                    if let Ok(cell) = self.heap.cell(undo.addr) {
                        cell.store(undo.prev, Ordering::Release);
                    }
                }
                for &(idx, version) in &tx.wt_locks {
                    self.table.slot(idx).release(version);
                }
            }
        }
        trace!(slot = tx.slot(), %reason, "rollback");
        tx.shared
            .stats()
            .on_abort(reason, tx.attempt_ns(), tx.level);
        tx.retries += 1;
        tx.shared.set_state(TxState::Aborted);
        self.callbacks
            .fire_tx_abort(tx.slot(), matches!(reason, AbortReason::Killed));
        self.finish_exclusive(tx);
        tx.shared.set_state(TxState::Inactive);
        tx.nesting = 0;
    }

    fn finish_exclusive(&self, tx: &mut TxDescriptor) {
        if tx.serial {
            self.quiesce.leave_exclusive();
            tx.serial = false;
        }
        if tx.shared.is_irrevocable() {
            self.irrevocable.store(false, Ordering::SeqCst);
        }
    }

    /// Check every read against the current lock table.
    ///
    /// A stripe owned by this transaction is checked against the version
    /// its acquisition displaced: with commit-time locking the stripe may
    /// have been republished between the read and the acquisition, and
    /// only an unchanged displaced version proves the read still holds.
    pub fn validate(&self, tx: &TxDescriptor) -> bool {
        for entry in tx.rset.iter() {
            let l = self.table.slot(entry.lock).read();
            if l.is_owned() {
                if l.owner_slot() != tx.slot() as usize {
                    return false;
                }
                if let Some(w) = tx.shared.wset().entry(l.entry_index()) {
                    if w.is_acquired() && w.version() != entry.version {
                        return false;
                    }
                }
            } else if l.version() != entry.version {
                return false;
            }
        }
        true
    }

    /// Try to slide the snapshot window forward to the current clock.
    /// Returns `false` when the read set no longer validates, in which
    /// case the attempt must roll back.
    pub fn extend(&self, tx: &mut TxDescriptor) -> bool {
        let now = self.clock.get();
        if !self.validate(tx) {
            return false;
        }
        tx.end = now;
        tx.shared.stats().on_extend();
        true
    }

    /// Arbitrate a conflict against the owner named by `observed`.
    ///
    /// `Ok(())` means the caller should re-read the stripe and retry the
    /// access (the owner was killed, finished, or moved on). `Err` means
    /// this transaction is the victim and must roll back; backoff and
    /// lock-wait directives are left on the descriptor for the next begin.
    pub(crate) fn contend(
        &self,
        tx: &mut TxDescriptor,
        lock_idx: usize,
        observed: LockWord,
        kind: ConflictKind,
    ) -> TxResult<()> {
        let owner_slot = observed.owner_slot() as u16;
        let owner = match self.registry.get(owner_slot) {
            Some(owner) => owner,
            None => return Ok(()),
        };
        let raw = owner.status_raw();
        if !status::is_running(raw) || raw & COMMITTING != 0 {
            // Owner is finishing; its release is imminent.
            return self.wait_for_change(tx, lock_idx, observed, kind);
        }

        let (our_reads, our_writes) = tx.shared.set_sizes();
        let us = cm::Contender {
            slot: tx.slot(),
            start: tx.start,
            reads: our_reads,
            writes: our_writes,
            irrevocable: tx.shared.is_irrevocable(),
        };
        let (their_reads, their_writes) = owner.set_sizes();
        let them = cm::Contender {
            slot: owner_slot,
            start: owner.start(),
            reads: their_reads,
            writes: their_writes,
            irrevocable: raw & IRREVOCABLE != 0,
        };
        let decision = cm::decide(self.cfg.contention, &us, &them, tx.losses);
        match decision.victim {
            Victim::Them => {
                if owner.try_kill(raw) {
                    trace!(
                        winner = tx.slot(),
                        victim = owner_slot,
                        "contention kill delivered"
                    );
                }
                // Whether or not the kill landed, wait for the stripe to
                // move and retry the access.
                self.wait_for_change(tx, lock_idx, observed, kind)
            }
            Victim::Us => {
                tx.losses += 1;
                tx.backoff = decision.backoff;
                if decision.wait_for_lock {
                    tx.wait_lock = Some(lock_idx);
                }
                Err(AbortReason::Conflict(kind))
            }
        }
    }

    /// Spin until the stripe's word differs from `observed`, aborting if
    /// we are killed or a quiescence halt is requested while waiting.
    pub(crate) fn wait_for_change(
        &self,
        tx: &TxDescriptor,
        lock_idx: usize,
        observed: LockWord,
        kind: ConflictKind,
    ) -> TxResult<()> {
        while self.table.slot(lock_idx).read() == observed {
            if tx.shared.is_killed() {
                return Err(AbortReason::Killed);
            }
            if self.quiesce.halt_requested() {
                return Err(AbortReason::Conflict(kind));
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Acquire irrevocable execution rights for the current attempt.
    ///
    /// At most one transaction holds the rights at a time; losing the race
    /// aborts with [`AbortReason::Irrevocable`]. With `serial` the whole
    /// runtime quiesces and the caller runs alone until commit or
    /// rollback, which is the only mode with a hard cannot-abort
    /// guarantee.
    pub fn become_irrevocable(&self, tx: &mut TxDescriptor, serial: bool) -> TxResult<()> {
        if tx.shared.is_irrevocable() {
            if serial && !tx.serial {
                self.quiesce.enter_exclusive(&self.registry, Some(tx.slot()));
                tx.serial = true;
            }
            return Ok(());
        }
        if self
            .irrevocable
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AbortReason::Irrevocable);
        }
        // The snapshot must be consistent before the rights are granted;
        // afterwards the contention manager guarantees we win conflicts.
        if !self.extend(tx) {
            self.irrevocable.store(false, Ordering::SeqCst);
            return Err(AbortReason::Validate);
        }
        tx.shared.set_irrevocable();
        debug!(slot = tx.slot(), serial, "irrevocable rights granted");
        if serial {
            self.quiesce.enter_exclusive(&self.registry, Some(tx.slot()));
            tx.serial = true;
        }
        Ok(())
    }

    /// Quiesce the runtime and reset clock and lock versions. Runs after
    /// a commit pushed the clock to the configured ceiling.
    fn rollover(&self, tx: &TxDescriptor) {
        debug!(slot = tx.slot(), clock = self.clock.get(), "clock rollover");
        self.quiesce.barrier(&self.registry, Some(tx.slot()), || {
            // Re-check under the barrier: a concurrent committer may have
            // rolled the clock over already.
            if self.clock.get() >= self.cfg.version_max {
                self.table.reset_versions();
                self.clock.reset();
            }
        });
    }

    /// Consistent single-word read outside any transaction. Returns the
    /// value and the version it was read at.
    pub fn unit_load(&self, addr: Addr) -> Result<(Word, u64)> {
        let cell = self.heap.cell(addr)?;
        let slot = self.table.slot_for(addr);
        loop {
            let l = slot.read();
            if l.is_owned() {
                std::hint::spin_loop();
                std::thread::yield_now();
                continue;
            }
            let value = cell.load(Ordering::Acquire);
            if slot.read() == l {
                return Ok((value, l.version()));
            }
        }
    }

    /// Atomic single-word store outside any transaction, serialized
    /// through the stripe lock. `slot_id` is the caller's registry slot.
    /// Returns the version the write was published at.
    pub fn unit_store(&self, slot_id: u16, addr: Addr, value: Word, mask: Word) -> Result<u64> {
        let cell = self.heap.cell(addr)?;
        let slot = self.table.slot_for(addr);
        loop {
            let l = slot.read();
            if l.is_owned() {
                std::hint::spin_loop();
                std::thread::yield_now();
                continue;
            }
            // The entry index is meaningless for a unit store; peekers
            // fail to resolve it and fall back to waiting.
            if !slot.try_acquire(l, LockWord::owned_by(slot_id as usize, LockWord::ENTRY_MAX)) {
                continue;
            }
            let current = cell.load(Ordering::Acquire);
            cell.store(
                filament_core::word::merge_masked(current, value, mask),
                Ordering::Release,
            );
            let t = self.clock.fetch_inc();
            slot.release(t);
            return Ok(t);
        }
    }

    /// Aggregate statistics across every thread that ever attached.
    pub fn global_stats(&self) -> GlobalStats {
        let mut agg = GlobalStats::zero(self.cfg.max_threads);
        for shared in self.registry.iter() {
            agg.absorb(shared.stats());
        }
        agg
    }

    /// Drain all pending commit records across threads.
    pub fn drain_commit_log(&self) -> Vec<CommitRecord> {
        self.registry
            .iter()
            .flat_map(|s| s.drain_commit_log())
            .collect()
    }

    /// Named parameter lookup for untyped benchmark drivers.
    pub fn parameter(&self, name: &str) -> Option<String> {
        match name {
            "design" => Some(self.cfg.design.name().into()),
            "contention_manager" => Some(self.cfg.contention.name().into()),
            "max_threads" => Some(self.cfg.max_threads.to_string()),
            "heap_words" => Some(self.cfg.heap_words.to_string()),
            "lock_bits" => Some(self.cfg.lock_bits.to_string()),
            "version_max" => Some(self.cfg.version_max.to_string()),
            _ => None,
        }
    }

    /// Named statistic lookup for untyped benchmark drivers.
    pub fn stat(&self, name: &str) -> Option<u64> {
        let g = self.global_stats();
        match name {
            "global_nb_commits" | "nb_commits" => Some(g.commits),
            "global_nb_aborts" | "nb_aborts" => Some(g.aborts),
            "global_nb_extensions" => Some(g.extensions),
            "global_nb_relocks" => Some(g.relocks),
            "nb_retries_min" => Some(if g.retries_min == u64::MAX {
                0
            } else {
                g.retries_min
            }),
            "nb_retries_max" => Some(g.retries_max),
            "nb_aborts_killed" => Some(g.aborts_by_reason[AbortReason::Killed.counter_index()]),
            "nb_aborts_validate" => Some(g.aborts_by_reason[AbortReason::Validate.counter_index()]),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("design", &self.cfg.design)
            .field("contention", &self.cfg.contention)
            .field("clock", &self.clock.get())
            .field("threads", &self.registry.attached())
            .finish()
    }
}
