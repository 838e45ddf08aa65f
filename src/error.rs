//! Error surface of the facade
//!
//! Two layers, mirroring the engine's recovery model:
//!
//! - [`Abort`] flows through transaction closures. It means "this attempt
//!   is dead"; the retry loop in [`ThreadCtx::atomically`] consumes it and
//!   runs the closure again, so user code usually just propagates it
//!   with `?`.
//! - [`Error`] is what `atomically` itself returns: setup failures and an
//!   exhausted retry budget. These reach the caller.
//!
//! [`ThreadCtx::atomically`]: crate::ThreadCtx::atomically

use thiserror::Error;

pub use filament_core::{AbortReason, ConflictKind, Error, Result};

/// Marker carried through a transaction closure when the current attempt
/// must roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transaction attempt aborted: {0}")]
pub struct Abort(pub AbortReason);

impl From<AbortReason> for Abort {
    fn from(reason: AbortReason) -> Self {
        Abort(reason)
    }
}

impl Abort {
    /// Why the attempt rolled back.
    pub fn reason(&self) -> AbortReason {
        self.0
    }
}

/// Result of one transaction attempt, as produced by user closures.
pub type TxnResult<T> = std::result::Result<T, Abort>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_display_carries_reason() {
        let abort = Abort(AbortReason::Explicit(7));
        assert!(abort.to_string().contains("explicit(7)"));
        assert_eq!(abort.reason(), AbortReason::Explicit(7));
    }

    #[test]
    fn test_abort_from_reason() {
        let abort: Abort = AbortReason::Validate.into();
        assert_eq!(abort.reason(), AbortReason::Validate);
    }
}
