//! Cooperative cancellation.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation signal and optional deadline shared by the caller and the
/// pipeline.
///
/// Checked on entry to a hook chain, before a statement runs and before a
/// commit. Once a commit has happened the operation is not rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires unless cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// A token that fires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .deadline
                .map(|d| Instant::now() >= d)
                .unwrap_or(false)
    }

    /// Return `Cancelled` if the token has fired.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            tracing::debug!(stage, "operation cancelled");
            return Err(Error::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check("execute").is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check("commit"),
            Err(Error::Cancelled { stage: "commit" })
        ));
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::with_deadline(Instant::now());
        assert!(token.is_cancelled());
        let token = CancelToken::with_timeout(Duration::from_secs(60));
        assert!(!token.is_cancelled());
    }
}
