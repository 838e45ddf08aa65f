//! Runtime and transaction facade
//!
//! [`Runtime`] wires the engine to the optional admission scheduler and
//! owns process-wide lifecycle. Each thread enters once to obtain a
//! [`ThreadCtx`], whose [`atomically`](ThreadCtx::atomically) runs a
//! closure under the retry loop: begin, run, commit, and on any abort
//! roll back and run it again (honoring backoff and lock-wait directives
//! left by the contention manager).

use crate::error::{Abort, TxnResult};
use filament_core::{AbortReason, Addr, CommitRecord, Config, Error, Result, Word};
use filament_engine::{
    CallbackRegistry, Engine, GlobalStats, TxAttributes, TxDescriptor, TxState,
};
use filament_sched::{AdmissionGate, Collector, StatsSource};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Builder for a [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    cfg: Config,
}

impl RuntimeBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit-protocol design (parsed name or enum via [`Config`]).
    pub fn design(mut self, design: filament_core::DesignVariant) -> Self {
        self.cfg.design = design;
        self
    }

    /// Contention-manager policy.
    pub fn contention(mut self, policy: filament_core::ContentionPolicy) -> Self {
        self.cfg.contention = policy;
        self
    }

    /// Transactional heap size in words.
    pub fn heap_words(mut self, words: usize) -> Self {
        self.cfg.heap_words = words;
        self
    }

    /// Maximum number of registered threads.
    pub fn max_threads(mut self, threads: usize) -> Self {
        self.cfg.max_threads = threads;
        self
    }

    /// log2 of the lock-table size.
    pub fn lock_bits(mut self, bits: u32) -> Self {
        self.cfg.lock_bits = bits;
        self
    }

    /// Version ceiling for the rollover protocol.
    pub fn version_max(mut self, max: u64) -> Self {
        self.cfg.version_max = max;
        self
    }

    /// Retry budget per `atomically` call.
    pub fn max_retries(mut self, retries: Option<u64>) -> Self {
        self.cfg.max_retries = retries;
        self
    }

    /// Enable the admission-control scheduler.
    pub fn admission(mut self, admission: filament_core::AdmissionConfig) -> Self {
        self.cfg.admission = Some(admission);
        self
    }

    /// Build and start the runtime.
    pub fn build(self) -> Result<Runtime> {
        Runtime::new(self.cfg)
    }
}

struct EngineCounters(Arc<Engine>);

impl StatsSource for EngineCounters {
    fn total_commits(&self) -> u64 {
        self.0.global_stats().commits
    }

    fn total_aborts(&self) -> u64 {
        self.0.global_stats().aborts
    }
}

struct Admission {
    gate: Arc<AdmissionGate>,
    collector: Mutex<Collector>,
}

/// The process-wide STM runtime.
pub struct Runtime {
    engine: Arc<Engine>,
    admission: Option<Admission>,
}

impl Runtime {
    /// Start a runtime from a configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        let engine = Arc::new(Engine::new(cfg)?);
        let admission = engine.config().admission.clone().map(|acfg| {
            let gate = Arc::new(AdmissionGate::new(acfg.initial_cap));
            let source: Arc<dyn StatsSource> = Arc::new(EngineCounters(Arc::clone(&engine)));
            let collector = Collector::spawn(
                acfg,
                Arc::clone(&gate),
                source,
                engine.config().max_threads,
            );
            Admission {
                gate,
                collector: Mutex::new(collector),
            }
        });
        Ok(Runtime { engine, admission })
    }

    /// Builder with the default configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Register the calling thread and return its transaction context.
    pub fn thread_enter(&self) -> Result<ThreadCtx<'_>> {
        let tx = self.engine.thread_enter()?;
        Ok(ThreadCtx { rt: self, tx })
    }

    /// Allocate a zeroed block of transactional words.
    pub fn alloc(&self, count: usize) -> Result<Addr> {
        self.engine.heap().alloc(count)
    }

    /// Non-transactional read, for setup and inspection only.
    pub fn read_word(&self, addr: Addr) -> Result<Word> {
        self.engine.heap().read(addr)
    }

    /// Non-transactional write, for setup only.
    pub fn write_word(&self, addr: Addr, value: Word) -> Result<()> {
        self.engine.heap().write(addr, value)
    }

    /// The lifecycle-hook registry. Hooks must be registered before the
    /// first thread enters.
    pub fn callbacks(&self) -> &CallbackRegistry {
        self.engine.callbacks()
    }

    /// Aggregate statistics across all threads.
    pub fn stats(&self) -> GlobalStats {
        self.engine.global_stats()
    }

    /// Named statistic, for untyped drivers.
    pub fn stat(&self, name: &str) -> Option<u64> {
        match name {
            "admission_cap" => self.admission.as_ref().map(|a| a.gate.cap() as u64),
            "admission_queued" => self.admission.as_ref().map(|a| a.gate.queued() as u64),
            _ => self.engine.stat(name),
        }
    }

    /// Named configuration parameter, for untyped drivers.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.engine.parameter(name)
    }

    /// Drain commit telemetry accumulated since the last drain.
    pub fn drain_commit_log(&self) -> Vec<CommitRecord> {
        self.engine.drain_commit_log()
    }

    /// Current admission cap, when the scheduler is enabled.
    pub fn admission_cap(&self) -> Option<usize> {
        self.admission.as_ref().map(|a| a.gate.cap())
    }

    /// Stop background work. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if let Some(admission) = &self.admission {
            admission.collector.lock().stop();
        }
        info!(
            commits = self.engine.global_stats().commits,
            "runtime shut down"
        );
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.engine)
            .field("admission", &self.admission_cap())
            .finish()
    }
}

/// Per-thread transaction context. Obtained from
/// [`Runtime::thread_enter`]; detaches from the runtime on drop.
pub struct ThreadCtx<'rt> {
    rt: &'rt Runtime,
    tx: TxDescriptor,
}

impl ThreadCtx<'_> {
    /// Run `f` transactionally with default attributes, retrying on
    /// aborts until it commits or the retry budget is exhausted.
    pub fn atomically<T>(&mut self, f: impl FnMut(&mut Txn<'_>) -> TxnResult<T>) -> Result<T> {
        self.atomically_with(TxAttributes::default(), f)
    }

    /// Run `f` transactionally with explicit attributes.
    pub fn atomically_with<T>(
        &mut self,
        attr: TxAttributes,
        mut f: impl FnMut(&mut Txn<'_>) -> TxnResult<T>,
    ) -> Result<T> {
        let engine = &self.rt.engine;
        let gate = self.rt.admission.as_ref().map(|a| &a.gate);
        let mut attempts: u64 = 0;
        self.tx.retries = 0;
        loop {
            let level = match gate {
                Some(gate) => gate.admit(),
                None => engine.registry().attached(),
            };
            engine.begin(&mut self.tx, attr, level);
            let outcome = match f(&mut Txn {
                engine,
                tx: &mut self.tx,
            }) {
                Ok(value) => engine.commit(&mut self.tx).map(|_| value),
                Err(abort) => Err(abort.0),
            };
            if let Some(gate) = gate {
                gate.release();
            }
            match outcome {
                Ok(value) => return Ok(value),
                Err(reason) => {
                    engine.rollback(&mut self.tx, reason);
                    attempts += 1;
                    let budget_spent = match self.rt.engine.config().max_retries {
                        Some(max) => attempts > max,
                        None => false,
                    };
                    if attr.no_retry || budget_spent {
                        return Err(Error::RetriesExhausted {
                            attempts,
                            last: reason,
                        });
                    }
                }
            }
        }
    }

    /// Consistent single-word read outside any transaction.
    pub fn unit_load(&self, addr: Addr) -> Result<(Word, u64)> {
        self.rt.engine.unit_load(addr)
    }

    /// Atomic single-word store outside any transaction. Returns the
    /// version the write was published at.
    pub fn unit_store(&self, addr: Addr, value: Word) -> Result<u64> {
        self.rt.engine.unit_store(self.tx.slot(), addr, value, u64::MAX)
    }

    /// Masked variant of [`ThreadCtx::unit_store`].
    pub fn unit_store_masked(&self, addr: Addr, value: Word, mask: Word) -> Result<u64> {
        self.rt.engine.unit_store(self.tx.slot(), addr, value, mask)
    }

    /// Registry slot of this thread.
    pub fn slot(&self) -> u16 {
        self.tx.slot()
    }
}

impl Drop for ThreadCtx<'_> {
    fn drop(&mut self) {
        self.rt.engine.thread_exit(&self.tx);
    }
}

impl std::fmt::Debug for ThreadCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCtx").field("slot", &self.slot()).finish()
    }
}

/// Handle to the running transaction inside an
/// [`atomically`](ThreadCtx::atomically) closure.
pub struct Txn<'a> {
    engine: &'a Engine,
    tx: &'a mut TxDescriptor,
}

impl Txn<'_> {
    /// Transactional word load.
    pub fn load(&mut self, addr: Addr) -> TxnResult<Word> {
        self.engine.load(self.tx, addr).map_err(Abort)
    }

    /// Transactional full-word store.
    pub fn store(&mut self, addr: Addr, value: Word) -> TxnResult<()> {
        self.engine.store(self.tx, addr, value).map_err(Abort)
    }

    /// Transactional store of the bytes selected by `mask`.
    pub fn store_masked(&mut self, addr: Addr, value: Word, mask: Word) -> TxnResult<()> {
        self.engine
            .store_masked(self.tx, addr, value, mask)
            .map_err(Abort)
    }

    /// Abort this attempt with a client code. The returned [`Abort`] is
    /// meant to be propagated out of the closure immediately.
    pub fn abort(&mut self, code: u32) -> Abort {
        Abort(AbortReason::Explicit(code))
    }

    /// Run `f` as a flat nested transaction: it shares this transaction's
    /// read and write sets and commits with it. An inner abort must be
    /// propagated; it aborts the whole flat transaction.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Txn<'_>) -> TxnResult<T>) -> TxnResult<T> {
        let attr = self.tx.attr;
        let level = self.tx.level;
        self.engine.begin(self.tx, attr, level);
        match f(self) {
            Ok(value) => {
                self.engine.commit(self.tx).map_err(Abort)?;
                Ok(value)
            }
            Err(abort) => {
                // Keep the flat counter consistent even if the caller
                // swallows the error against the rules.
                self.tx.nesting = self.tx.nesting.saturating_sub(1);
                Err(abort)
            }
        }
    }

    /// Acquire irrevocable rights for this attempt; with `serial` the
    /// runtime quiesces and the attempt runs alone until commit.
    pub fn become_irrevocable(&mut self, serial: bool) -> TxnResult<()> {
        self.engine.become_irrevocable(self.tx, serial).map_err(Abort)
    }

    /// Store a value in the per-thread specific-data slot `idx`.
    pub fn set_specific(
        &mut self,
        idx: usize,
        value: Box<dyn std::any::Any + Send>,
    ) -> Result<()> {
        self.tx.set_specific(idx, value)
    }

    /// Borrow the value in specific-data slot `idx`.
    pub fn specific(&self, idx: usize) -> Option<&(dyn std::any::Any + Send)> {
        self.tx.specific(idx)
    }

    /// Whether this attempt is still running and not marked for death.
    pub fn active(&self) -> bool {
        self.tx.shared.state() == TxState::Active && !self.tx.shared.is_killed()
    }

    /// Whether a peer has killed this attempt. The next transactional
    /// access will roll it back; a long non-transactional computation can
    /// poll this to bail out early.
    pub fn aborted(&self) -> bool {
        self.tx.shared.is_killed() || self.tx.shared.state() == TxState::Aborted
    }

    /// Whether this attempt holds irrevocable rights.
    pub fn irrevocable(&self) -> bool {
        self.tx.shared.is_irrevocable()
    }

    /// Snapshot window start of this attempt.
    pub fn start_timestamp(&self) -> u64 {
        self.tx.start
    }

    /// Number of aborted attempts of this transaction so far.
    pub fn retries(&self) -> u64 {
        self.tx.retries
    }
}

impl std::fmt::Debug for Txn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn").field("tx", &self.tx).finish()
    }
}
