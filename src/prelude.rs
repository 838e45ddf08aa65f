//! Convenient imports for Filament.
//!
//! Re-exports the types almost every user touches:
//!
//! ```
//! use filament::prelude::*;
//!
//! # fn main() -> filament::Result<()> {
//! let rt = Runtime::builder().heap_words(64).build()?;
//! # Ok(())
//! # }
//! ```

pub use crate::error::{Abort, AbortReason, Error, Result, TxnResult};
pub use crate::runtime::{Runtime, RuntimeBuilder, ThreadCtx, Txn};

pub use crate::{Addr, Config, ContentionPolicy, DesignVariant, TxAttributes, Word};
pub use crate::AdmissionConfig;
