//! The filament transaction engine
//!
//! Everything between the public facade and the lock table lives here:
//!
//! - [`TxShared`] / [`Registry`]: the cross-thread-visible half of a
//!   transaction descriptor and the process-wide slot registry
//! - [`TxDescriptor`]: the thread-private half (read set, undo log,
//!   attributes, timing)
//! - [`Engine`]: the commit protocols (write-back encounter-time,
//!   write-back commit-time, write-through), validation, snapshot
//!   extension, contention handling, quiescence/rollover and
//!   irrevocability
//! - [`cm`]: the contention-manager policies
//! - [`CallbackRegistry`]: bounded external-module hooks
//! - [`stats`]: per-thread and aggregated counters plus the commit log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod cm;
pub mod descriptor;
mod designs;
pub mod engine;
pub mod quiesce;
pub mod registry;
pub mod sets;
pub mod shared;
pub mod stats;
pub mod status;

pub use callbacks::{CallbackRegistry, MAX_CALLBACKS};
pub use descriptor::{TxAttributes, TxDescriptor, MAX_SPECIFIC};
pub use engine::{Engine, TxResult};
pub use registry::Registry;
pub use shared::TxShared;
pub use stats::{GlobalStats, LevelSample};
pub use status::TxState;
