//! Cooperative cancellation.
//!
//! The top-level invoker holds a [`CancelToken`]; the executor and flow
//! scheduler check it at op-step and edge boundaries and surface
//! `ErrCancelled` once it trips.

use alp_core::{AlpError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was signalled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AlpError::cancelled("execution cancelled"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alp_core::ErrorKind;

    #[test]
    fn clones_share_the_signal() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());
        token.cancel();
        assert!(observer.is_cancelled());
        assert_eq!(observer.check().unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
