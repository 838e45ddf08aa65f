//! Versioned lock table and global clock
//!
//! Every transactional address hashes to one slot of a fixed-size table of
//! versioned locks. A lock word either carries a version (unowned) or a
//! reference to its owner (owned). Commits publish new versions drawn from
//! the global clock with release ordering, so a reader that observes a
//! version also observes every write that version protects.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod table;
pub mod word;

pub use clock::GlobalClock;
pub use table::{LockSlot, LockTable};
pub use word::LockWord;
