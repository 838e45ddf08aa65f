//! External-module lifecycle hooks
//!
//! Extensions register callbacks for transaction lifecycle events before
//! the first thread attaches. Registration is bounded and sealed: once a
//! thread enters, the tables are frozen, so dispatch on the hot path is a
//! plain slice walk with no locking.

use filament_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Upper bound on registered callbacks per hook kind.
pub const MAX_CALLBACKS: usize = 16;

/// A registered hook. Receives the registry slot of the thread the event
/// fired on.
pub type Callback = Box<dyn Fn(u16) + Send + Sync>;

/// An abort hook additionally receives whether the rollback was caused by
/// an external kill.
pub type AbortCallback = Box<dyn Fn(u16, bool) + Send + Sync>;

#[derive(Default)]
struct Tables {
    thread_enter: Vec<Callback>,
    thread_exit: Vec<Callback>,
    tx_begin: Vec<Callback>,
    tx_commit: Vec<Callback>,
    tx_abort: Vec<AbortCallback>,
}

/// Bounded, seal-on-use callback registry.
pub struct CallbackRegistry {
    tables: Mutex<Tables>,
    sealed: AtomicBool,
}

macro_rules! register_fn {
    ($(#[$meta:meta])* $name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $name(&self, cb: $ty) -> Result<()> {
            if self.sealed.load(Ordering::Acquire) {
                return Err(Error::Config(
                    "callbacks cannot be registered after a thread has attached".into(),
                ));
            }
            let mut tables = self.tables.lock();
            if tables.$field.len() >= MAX_CALLBACKS {
                return Err(Error::Capacity {
                    resource: "callbacks",
                    limit: MAX_CALLBACKS,
                    requested: tables.$field.len() + 1,
                });
            }
            tables.$field.push(cb);
            Ok(())
        }
    };
}

impl CallbackRegistry {
    /// An empty, unsealed registry.
    pub fn new() -> Self {
        CallbackRegistry {
            tables: Mutex::new(Tables::default()),
            sealed: AtomicBool::new(false),
        }
    }

    register_fn!(
        /// Hook fired when a thread attaches.
        on_thread_enter, thread_enter, Callback
    );
    register_fn!(
        /// Hook fired when a thread detaches.
        on_thread_exit, thread_exit, Callback
    );
    register_fn!(
        /// Hook fired at the begin of every attempt, including retries.
        on_tx_begin, tx_begin, Callback
    );
    register_fn!(
        /// Hook fired after a successful commit.
        on_tx_commit, tx_commit, Callback
    );

    /// Hook fired after a rollback, with the external-kill flag.
    pub fn on_tx_abort(&self, cb: AbortCallback) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::Config(
                "callbacks cannot be registered after a thread has attached".into(),
            ));
        }
        let mut tables = self.tables.lock();
        if tables.tx_abort.len() >= MAX_CALLBACKS {
            return Err(Error::Capacity {
                resource: "callbacks",
                limit: MAX_CALLBACKS,
                requested: tables.tx_abort.len() + 1,
            });
        }
        tables.tx_abort.push(cb);
        Ok(())
    }

    /// Freeze the tables. Called by the first thread attach; later
    /// registrations fail.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Fire the thread-enter hooks.
    pub fn fire_thread_enter(&self, slot: u16) {
        for cb in &self.tables.lock().thread_enter {
            cb(slot);
        }
    }

    /// Fire the thread-exit hooks.
    pub fn fire_thread_exit(&self, slot: u16) {
        for cb in &self.tables.lock().thread_exit {
            cb(slot);
        }
    }

    /// Fire the begin hooks.
    pub fn fire_tx_begin(&self, slot: u16) {
        for cb in &self.tables.lock().tx_begin {
            cb(slot);
        }
    }

    /// Fire the commit hooks.
    pub fn fire_tx_commit(&self, slot: u16) {
        for cb in &self.tables.lock().tx_commit {
            cb(slot);
        }
    }

    /// Fire the abort hooks.
    pub fn fire_tx_abort(&self, slot: u16, killed: bool) {
        for cb in &self.tables.lock().tx_abort {
            cb(slot, killed);
        }
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("sealed", &self.sealed.load(Ordering::Relaxed))
            .finish()
    }
}
