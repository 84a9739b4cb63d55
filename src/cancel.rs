use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::KiraError;

/// Shared flag raised by the signal handler. Long-running loops poll it and
/// return [`KiraError::Cancelled`] so scoped resources are dropped normally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), KiraError> {
        if self.is_cancelled() {
            return Err(KiraError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(flag.check().is_ok());
        handle.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(KiraError::Cancelled)));
    }
}
