//! Cancellation signal handling.
//!
//! A single flag shared between the SIGINT handler and the task coordinator.
//! The coordinator stops dispatching new tasks once the flag is set;
//! already-running tasks finish and their outputs are discarded with the
//! failed build.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Install a SIGINT/SIGTERM handler that sets this flag.
    ///
    /// Handler installation can fail when another handler is already
    /// registered; the build then simply runs without signal cancellation.
    pub fn install_handler(&self) {
        let flag = self.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("cancellation requested, finishing running tasks...");
            flag.cancel();
        }) {
            eprintln!("WARNING: could not install signal handler: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_clear_and_latches() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());

        // Clones observe the same state
        let clone = flag.clone();
        assert!(clone.is_cancelled());
    }
}
