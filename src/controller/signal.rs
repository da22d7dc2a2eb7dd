use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Operator-triggered cancellation for the controller's single suspension
/// point. Cloneable; all clones observe the same flag.
#[derive(Clone)]
pub struct KillSwitch {
    killed: Arc<AtomicBool>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.killed.store(false, Ordering::SeqCst);
    }
}
