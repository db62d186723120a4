//! Cooperative suspension and cancellation signal.
//!
//! A [`SuspendController`] is shared between the caller and the running
//! execution (including nested steps and sub-workflows). The chain executor
//! polls it at step boundaries; long-running steps may poll it or await
//! [`SuspendController::signalled`]. Nothing is ever force-killed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Current request held by a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendState {
    Active,
    SuspendRequested(String),
    CancelRequested(String),
}

struct Inner {
    state: SuspendState,
    token: CancellationToken,
}

/// Shared suspend/cancel signal for one run (and its resumes).
#[derive(Clone)]
pub struct SuspendController {
    inner: Arc<Mutex<Inner>>,
}

impl SuspendController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SuspendState::Active,
                token: CancellationToken::new(),
            })),
        }
    }

    /// Ask the execution to pause at the next step boundary.
    ///
    /// Returns `false` if a cancellation is already pending; cancellation wins.
    pub fn suspend(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SuspendState::CancelRequested(_)) {
            return false;
        }
        let reason = reason.into();
        debug!("Suspension requested: {}", reason);
        inner.state = SuspendState::SuspendRequested(reason);
        inner.token.cancel();
        true
    }

    /// Ask the execution to stop. Terminal: the run cannot be resumed afterwards.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock();
        let reason = reason.into();
        debug!("Cancellation requested: {}", reason);
        inner.state = SuspendState::CancelRequested(reason);
        inner.token.cancel();
    }

    pub fn state(&self) -> SuspendState {
        self.inner.lock().state.clone()
    }

    pub fn is_suspend_requested(&self) -> bool {
        matches!(self.inner.lock().state, SuspendState::SuspendRequested(_))
    }

    pub fn is_cancel_requested(&self) -> bool {
        matches!(self.inner.lock().state, SuspendState::CancelRequested(_))
    }

    /// Whether any request is pending.
    pub fn is_signalled(&self) -> bool {
        !matches!(self.inner.lock().state, SuspendState::Active)
    }

    /// Reason attached to the pending request.
    pub fn reason(&self) -> Option<String> {
        match &self.inner.lock().state {
            SuspendState::Active => None,
            SuspendState::SuspendRequested(reason) | SuspendState::CancelRequested(reason) => {
                Some(reason.clone())
            }
        }
    }

    /// Resolves once a suspend or cancel request is made.
    pub async fn signalled(&self) {
        let token = self.inner.lock().token.clone();
        token.cancelled().await;
    }

    /// Clear a served suspend request so the controller can be reused after resume.
    ///
    /// A pending cancellation is kept.
    pub(crate) fn reset(&self) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.state {
            SuspendState::CancelRequested(_) => false,
            SuspendState::Active => true,
            SuspendState::SuspendRequested(_) => {
                inner.state = SuspendState::Active;
                inner.token = CancellationToken::new();
                true
            }
        }
    }
}

impl Default for SuspendController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SuspendController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendController")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_active() {
        let controller = SuspendController::new();
        assert_eq!(controller.state(), SuspendState::Active);
        assert!(!controller.is_signalled());
        assert!(controller.reason().is_none());
    }

    #[test]
    fn test_suspend_records_reason() {
        let controller = SuspendController::new();
        assert!(controller.suspend("waiting for approval"));
        assert!(controller.is_suspend_requested());
        assert_eq!(controller.reason().as_deref(), Some("waiting for approval"));
    }

    #[test]
    fn test_cancel_wins_over_suspend() {
        let controller = SuspendController::new();
        controller.cancel("stop");
        assert!(!controller.suspend("later"));
        assert_eq!(
            controller.state(),
            SuspendState::CancelRequested("stop".to_string())
        );

        let controller = SuspendController::new();
        controller.suspend("pause");
        controller.cancel("stop");
        assert!(controller.is_cancel_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let controller = SuspendController::new();
        let clone = controller.clone();
        clone.cancel("from clone");
        assert!(controller.is_cancel_requested());
    }

    #[test]
    fn test_reset_clears_suspend_but_keeps_cancel() {
        let controller = SuspendController::new();
        controller.suspend("pause");
        assert!(controller.reset());
        assert_eq!(controller.state(), SuspendState::Active);

        controller.cancel("stop");
        assert!(!controller.reset());
        assert!(controller.is_cancel_requested());
    }

    #[tokio::test]
    async fn test_signalled_resolves_on_request() {
        let controller = SuspendController::new();
        let waiter = controller.clone();
        let handle = tokio::spawn(async move { waiter.signalled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.suspend("pause");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("signal should wake waiter")
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_installs_fresh_signal() {
        let controller = SuspendController::new();
        controller.suspend("pause");
        controller.reset();

        let pending = tokio::time::timeout(Duration::from_millis(20), controller.signalled()).await;
        assert!(pending.is_err(), "fresh signal must not be fired");
    }
}
