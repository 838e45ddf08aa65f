//! Core types for the filament STM engine
//!
//! This crate defines the fundamental vocabulary shared by every layer:
//! - [`Addr`] / [`Word`]: word-granular transactional addressing
//! - [`WordHeap`]: the bounds-checked slab of transactional memory
//! - [`Config`]: engine configuration (design variant, contention policy,
//!   admission control)
//! - [`Error`] / [`AbortReason`]: the setup-time and abort-time taxonomies
//! - [`CommitRecord`]: the telemetry record consumed by external collectors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod heap;
pub mod stats;
pub mod word;

pub use config::{AdmissionConfig, Config, ContentionPolicy, DesignVariant};
pub use error::{AbortReason, ConflictKind, Error, Result};
pub use heap::WordHeap;
pub use stats::CommitRecord;
pub use word::{Addr, Word, VERSION_MAX};
