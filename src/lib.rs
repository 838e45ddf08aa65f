//! # Filament
//!
//! Word-granular software transactional memory with a versioned lock
//! table, pluggable contention management and optional admission-control
//! scheduling.
//!
//! ## Quick Start
//!
//! ```
//! use filament::prelude::*;
//!
//! # fn main() -> filament::Result<()> {
//! let rt = Runtime::builder().heap_words(1024).build()?;
//! let counter = rt.alloc(1)?;
//!
//! let mut ctx = rt.thread_enter()?;
//! ctx.atomically(|txn| {
//!     let v = txn.load(counter)?;
//!     txn.store(counter, v + 1)
//! })?;
//!
//! assert_eq!(rt.read_word(counter)?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Design
//!
//! Transactions run optimistically against a snapshot window of the
//! global version clock, with per-stripe versioned locks arbitrating
//! writers. Three commit protocols are available ([`DesignVariant`]):
//! write-back with encounter-time locking, write-back with commit-time
//! locking, and write-through with undo logging. Conflicts are resolved
//! by a configurable [`ContentionPolicy`]; an aborted attempt is rolled
//! back and transparently retried by [`ThreadCtx::atomically`].
//!
//! With [`AdmissionConfig`] set, a background tuner additionally caps how
//! many transactions run concurrently, trading parallelism for fewer
//! conflicts when contention is high.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod runtime;

pub mod global;
pub mod prelude;

pub use error::{Abort, AbortReason, ConflictKind, Error, Result, TxnResult};
pub use runtime::{Runtime, RuntimeBuilder, ThreadCtx, Txn};

pub use filament_core::{
    AdmissionConfig, Addr, Config, ContentionPolicy, DesignVariant, Word, VERSION_MAX,
};
pub use filament_engine::{GlobalStats, LevelSample, TxAttributes};
