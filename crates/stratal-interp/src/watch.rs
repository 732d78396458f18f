//! Process-wide execution watch hook.
//!
//! The engine publishes the statement it is about to run (from
//! `DebugInfo` nodes) so an externally installed interrupt handler can
//! report where a run was cut short. The hook itself does not install
//! signal handlers; that stays with the embedding process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

pub struct Watchdog {
    installed: AtomicBool,
    verbose: AtomicBool,
    statement: Mutex<Option<String>>,
}

impl Watchdog {
    fn new() -> Self {
        Watchdog {
            installed: AtomicBool::new(false),
            verbose: AtomicBool::new(false),
            statement: Mutex::new(None),
        }
    }

    pub fn instance() -> &'static Watchdog {
        static INSTANCE: OnceLock<Watchdog> = OnceLock::new();
        INSTANCE.get_or_init(Watchdog::new)
    }

    pub fn install(&self) {
        self.installed.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.installed.store(false, Ordering::SeqCst);
        self.verbose.store(false, Ordering::SeqCst);
        *self.statement.lock() = None;
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Echo every published statement to standard error.
    pub fn enable_logging(&self) {
        self.verbose.store(true, Ordering::SeqCst);
    }

    pub fn set_statement(&self, message: &str) {
        if self.verbose.load(Ordering::SeqCst) {
            eprintln!("{message}");
        }
        *self.statement.lock() = Some(message.to_string());
    }

    /// The most recently published statement, for interrupt reporting.
    pub fn statement(&self) -> Option<String> {
        self.statement.lock().clone()
    }
}
