//! Process-global runtime with implicit thread handles
//!
//! Convenience layer for programs that want one STM per process: call
//! [`init`] once, then [`atomically`] from any thread. The calling thread
//! is registered on first use and its context lives in thread-local
//! storage until [`exit_thread`] or the thread ends. Explicit [`Runtime`]
//! handles remain the primary API; this layer only removes the handle
//! plumbing.

use crate::error::TxnResult;
use crate::runtime::{Runtime, Txn};
use crate::ThreadCtx;
use filament_core::{Config, Error, Result};
use once_cell::sync::OnceCell;
use std::cell::RefCell;

static GLOBAL: OnceCell<Runtime> = OnceCell::new();

thread_local! {
    static CURRENT: RefCell<Option<ThreadCtx<'static>>> = const { RefCell::new(None) };
}

/// Initialize the process-global runtime. May be called once per process;
/// a second call reports `Error::Config`.
pub fn init(cfg: Config) -> Result<()> {
    let rt = Runtime::new(cfg)?;
    GLOBAL
        .set(rt)
        .map_err(|_| Error::Config("global runtime already initialized".into()))
}

/// The global runtime, once [`init`] has run.
pub fn runtime() -> Option<&'static Runtime> {
    GLOBAL.get()
}

fn require() -> Result<&'static Runtime> {
    GLOBAL
        .get()
        .ok_or_else(|| Error::Config("global runtime not initialized".into()))
}

/// Run `f` transactionally on the global runtime, registering the calling
/// thread on first use.
///
/// Calling this function from inside `f` is an error; nest through
/// [`Txn::nested`] instead. The transaction contexts of the outer and the
/// would-be inner call cannot quiesce past each other.
pub fn atomically<T>(f: impl FnMut(&mut Txn<'_>) -> TxnResult<T>) -> Result<T> {
    let rt = require()?;
    CURRENT.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| {
            Error::Config("global atomically is not reentrant; use Txn::nested".into())
        })?;
        if let Some(ctx) = slot.as_mut() {
            return ctx.atomically(f);
        }
        let mut ctx = rt.thread_enter()?;
        let out = ctx.atomically(f);
        *slot = Some(ctx);
        out
    })
}

/// Detach the calling thread from the global runtime. A later
/// [`atomically`] on this thread registers it again.
pub fn exit_thread() {
    CURRENT.with(|cell| {
        if let Ok(mut slot) = cell.try_borrow_mut() {
            *slot = None;
        }
    });
}
