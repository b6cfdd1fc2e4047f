//! Single-shot, restartable countdown timer.
//!
//! Used for the idle watchdog and reconnect scheduling. The callback runs on
//! a spawned tokio task when the countdown elapses.
//!
//! The enabled flag is set by [`DelayTimer::start`] and cleared only by
//! [`DelayTimer::stop`] — NOT when the countdown fires. Callers re-arm with
//! stop-then-start; a bare `start()` after a fire is a no-op. The
//! reconnection policy depends on this, so the asymmetry is contractual.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// DelayTimer
// ============================================================================

/// A single-shot countdown with an injected callback.
pub struct DelayTimer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    callback: Box<dyn Fn() + Send + Sync>,
    enabled: AtomicBool,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DelayTimer {
    /// Creates a disarmed timer with the callback it will fire.
    #[must_use]
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                callback: Box::new(callback),
                enabled: AtomicBool::new(false),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Arms the countdown.
    ///
    /// A no-op while the enabled flag is set (idempotent). Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `interval_secs` is zero.
    pub fn start(&self, interval_secs: u64) -> Result<()> {
        if interval_secs == 0 {
            return Err(Error::invalid_argument(
                "interval must be greater than 0 seconds",
            ));
        }

        if self.inner.enabled.swap(true, Ordering::SeqCst) {
            trace!(interval_secs, "timer already enabled, start ignored");
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            // Single shot: the task ends here, but the enabled flag stays
            // set until stop().
            (inner.callback)();
        });

        *self.inner.pending.lock() = Some(handle);
        Ok(())
    }

    /// Cancels any pending countdown and clears the enabled flag.
    pub fn stop(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.pending.lock().take() {
            handle.abort();
        }
    }

    /// Releases the pending countdown. Safe to call multiple times; the
    /// timer may be started again afterwards.
    pub fn dispose(&self) {
        self.stop();
    }

    /// Whether the timer is currently marked enabled.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }
}

impl Drop for DelayTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn counting_timer() -> (DelayTimer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let timer = DelayTimer::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        (timer, fired)
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (timer, _) = counting_timer();
        assert!(matches!(
            timer.start(0),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(!timer.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_interval() {
        let (timer, fired) = counting_timer();
        timer.start(3).expect("start");
        assert!(timer.is_enabled());

        tokio::time::sleep(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot() {
        let (timer, fired) = counting_timer();
        timer.start(1).expect("start");

        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_callback() {
        let (timer, fired) = counting_timer();
        timer.start(5).expect("start");
        timer.stop();
        assert!(!timer.is_enabled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_noop_while_enabled() {
        let (timer, fired) = counting_timer();
        timer.start(5).expect("start");
        // Second start must not reschedule a second countdown.
        timer.start(1).expect("start");

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    // The enabled flag outlives the countdown: after a fire, start() alone
    // is ignored until stop() clears the flag.
    #[tokio::test(start_paused = true)]
    async fn test_enabled_persists_after_fire() {
        let (timer, fired) = counting_timer();
        timer.start(1).expect("start");

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.is_enabled());

        timer.start(1).expect("start");
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1, "bare start after fire must not re-arm");

        timer.stop();
        timer.start(1).expect("start");
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2, "stop-then-start re-arms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_idempotent_and_restartable() {
        let (timer, fired) = counting_timer();
        timer.start(1).expect("start");
        timer.dispose();
        timer.dispose();
        assert!(!timer.is_enabled());

        timer.start(1).expect("start");
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
