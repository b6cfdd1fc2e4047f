//! Application-lifecycle coordinator.
//!
//! Decides whether a backgrounded application should actually drop its
//! connection or merely pause: entering the background arms a cancellable
//! grace delay, and only a stay longer than the grace window closes the
//! socket. A quick foreground bounce cancels the delay and the connection
//! survives untouched.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::controller::ConnectionController;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Grace window before a background stay counts as a real disconnect.
const GRACE_WINDOW: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Outcome of the most recent grace delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GraceStatus {
    /// Never backgrounded. Treated like a completed delay: the foreground
    /// transition reconnects.
    #[default]
    Idle,
    /// Delay armed and counting down.
    Pending,
    /// Delay ran to completion; the socket-close callback was invoked.
    Completed,
    /// Delay was cancelled mid-flight; nothing was closed.
    Cancelled,
}

#[derive(Default)]
struct GraceState {
    status: GraceStatus,
    cancel: Option<oneshot::Sender<()>>,
}

// ============================================================================
// BackgroundCoordinator
// ============================================================================

/// Coordinates app-lifecycle transitions against the connection controller.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BackgroundCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    controller: ConnectionController,
    close_handler: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    grace: Mutex<GraceState>,
}

impl BackgroundCoordinator {
    /// Creates a coordinator over the given controller.
    #[must_use]
    pub fn new(controller: ConnectionController) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                controller,
                close_handler: Mutex::new(None),
                grace: Mutex::new(GraceState::default()),
            }),
        }
    }

    /// Registers the socket-close callback invoked when the grace window
    /// elapses uncancelled. Without one the elapsed window is a logged
    /// no-op.
    pub fn set_close_handler(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.inner.close_handler.lock() = Some(Arc::new(f));
    }

    /// The application entered the background.
    ///
    /// Arms the grace delay and suspends until it completes or is
    /// cancelled by [`entered_foreground`](Self::entered_foreground). On
    /// completion the registered socket-close callback runs — a long
    /// background stay is a real disconnect. On cancellation nothing is
    /// closed.
    pub async fn entered_background(&self) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        {
            let mut grace = self.inner.grace.lock();
            grace.status = GraceStatus::Pending;
            grace.cancel = Some(cancel_tx);
        }

        tokio::select! {
            () = tokio::time::sleep(GRACE_WINDOW) => {
                self.inner.grace.lock().status = GraceStatus::Completed;
                let handler = self.inner.close_handler.lock().clone();
                match handler {
                    Some(handler) => handler(),
                    None => debug!("grace window elapsed with no close handler registered"),
                }
            }
            _ = cancel_rx => {
                debug!("socket closing was aborted, connection still alive");
                self.inner.grace.lock().status = GraceStatus::Cancelled;
            }
        }
    }

    /// The application returned to the foreground.
    ///
    /// If the grace delay already ran to completion (the socket was
    /// closed), reconnects — arming the reopen timer when the attempt
    /// fails. If the delay is still pending it is cancelled: the transport
    /// was never closed, so there is nothing to reconnect.
    ///
    /// # Errors
    ///
    /// Re-raises transport-layer errors from the reconnect attempt.
    pub async fn entered_foreground(&self) -> Result<()> {
        let reconnect = {
            let mut grace = self.inner.grace.lock();
            match grace.status {
                GraceStatus::Completed | GraceStatus::Idle => true,
                GraceStatus::Pending | GraceStatus::Cancelled => {
                    if let Some(cancel) = grace.cancel.take() {
                        let _ = cancel.send(());
                    }
                    false
                }
            }
        };

        if reconnect && !self.inner.controller.connect().await? {
            self.inner.controller.start_reopen_timer();
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SessionCredentials;
    use crate::session::SessionEngine;
    use crate::testkit::{FakeHub, FakeMode};

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator_with(
        mode: FakeMode,
    ) -> (BackgroundCoordinator, ConnectionController, Arc<FakeHub>) {
        let hub = FakeHub::new(mode);
        let controller = ConnectionController::new(SessionEngine::new(hub.factory()));
        controller.on_needs_credentials(|request| {
            request.fulfill(
                SessionCredentials::new("u", "p", "s1", "m1", "h", "d", None)
                    .expect("valid credentials"),
            );
        });
        (BackgroundCoordinator::new(controller.clone()), controller, hub)
    }

    fn counting_close_handler(coordinator: &BackgroundCoordinator) -> Arc<AtomicUsize> {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        coordinator.set_close_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        closes
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_completion_invokes_close_handler() {
        let (coordinator, _controller, _hub) = coordinator_with(FakeMode::AutoConfirm);
        let closes = counting_close_handler(&coordinator);

        let background = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.entered_background().await })
        };

        tokio::time::sleep(GRACE_WINDOW + Duration::from_secs(1)).await;
        background.await.expect("background");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_before_grace_cancels_without_closing() {
        let (coordinator, _controller, hub) = coordinator_with(FakeMode::AutoConfirm);
        let closes = counting_close_handler(&coordinator);

        let background = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.entered_background().await })
        };
        settle().await;

        coordinator.entered_foreground().await.expect("foreground");
        background.await.expect("background");

        // Well past the original grace deadline: still no close, no
        // reconnect.
        tokio::time::sleep(GRACE_WINDOW * 3).await;
        settle().await;
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(hub.attempts(), 0);
        assert_eq!(coordinator.inner.grace.lock().status, GraceStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_after_grace_connects_exactly_once() {
        let (coordinator, _controller, hub) = coordinator_with(FakeMode::AutoConfirm);
        counting_close_handler(&coordinator);

        let background = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.entered_background().await })
        };
        tokio::time::sleep(GRACE_WINDOW + Duration::from_secs(1)).await;
        background.await.expect("background");

        coordinator.entered_foreground().await.expect("foreground");
        assert_eq!(hub.attempts(), 1);
    }

    #[tokio::test]
    async fn test_foreground_without_background_reconnects() {
        let (coordinator, _controller, hub) = coordinator_with(FakeMode::AutoConfirm);

        coordinator.entered_foreground().await.expect("foreground");
        assert_eq!(hub.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_foreground_reconnect_arms_reopen_timer() {
        let (coordinator, _controller, hub) = coordinator_with(FakeMode::FailConnect);

        coordinator.entered_foreground().await.expect("foreground");
        assert_eq!(hub.attempts(), 1);

        // The armed reopen timer drives the next flat-interval attempt.
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(hub.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_foreground_after_cancel_is_noop() {
        let (coordinator, _controller, hub) = coordinator_with(FakeMode::AutoConfirm);
        let closes = counting_close_handler(&coordinator);

        let background = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.entered_background().await })
        };
        settle().await;

        coordinator.entered_foreground().await.expect("foreground");
        background.await.expect("background");
        // Status is Cancelled: a second foreground keeps taking the cancel
        // path instead of reconnecting.
        coordinator.entered_foreground().await.expect("foreground");

        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(hub.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wired_close_handler_closes_open_session() {
        let (coordinator, controller, hub) = coordinator_with(FakeMode::AutoConfirm);
        {
            let controller = controller.clone();
            coordinator.set_close_handler(move || {
                let controller = controller.clone();
                tokio::spawn(async move { controller.close_due_to_background().await });
            });
        }

        assert!(controller.connect().await.expect("connect"));

        let background = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.entered_background().await })
        };
        tokio::time::sleep(GRACE_WINDOW + Duration::from_secs(1)).await;
        background.await.expect("background");
        settle().await;

        assert_eq!(hub.latest().close_calls.lock().len(), 1);
        assert!(!controller.is_open());
    }
}
