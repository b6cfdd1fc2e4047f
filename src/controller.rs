//! Connection controller: reconnection policy and application-facing
//! lifecycle notifications.
//!
//! The controller owns one [`SessionEngine`] and translates its closure
//! causes into user-visible signals. Applications only ever observe the
//! lifecycle notifications (`connecting`, `connected`, `disconnected`,
//! `closed_by_user`) plus `ready_for_reconnect` and `needs_credentials`;
//! raw transport errors reach them solely from a [`connect`]
//! (ConnectionController::connect) call they issued themselves.
//!
//! # Notifications
//!
//! Each signal has its own observer list (no monolithic dispatcher):
//!
//! | Signal | Payload | Meaning |
//! |--------|---------|---------|
//! | `needs_credentials` | [`CredentialsRequest`] | fulfill to proceed |
//! | `connecting` | — | attempt started |
//! | `connected` | — | handshake confirmed |
//! | `disconnected` | — | a connected session ended |
//! | `ready_for_reconnect` | — | backend migration finished closing |
//! | `message` | `&str` | application payload off the queue |
//! | `closed_by_user` | — | deliberate close completed |
//! | `needs_reauth` | — | credentials likely rotated |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::credentials::SessionCredentials;
use crate::error::{Error, Result};
use crate::session::{CloseMode, DisconnectCause, SessionEngine, SessionEvent};
use crate::timer::DelayTimer;
use crate::transport::ws_factory;

// ============================================================================
// Constants
// ============================================================================

/// Flat reconnection interval in seconds. No backoff, no cap.
const REOPEN_INTERVAL_SECS: u64 = 5;

// ============================================================================
// Types
// ============================================================================

type Callback = Box<dyn Fn() + Send + Sync>;
type MessageCallback = Box<dyn Fn(&str) + Send + Sync>;
type CredentialsCallback = Box<dyn Fn(CredentialsRequest) + Send + Sync>;

// ============================================================================
// CredentialsRequest
// ============================================================================

/// A resolvable credentials request handed to `needs_credentials`
/// observers.
///
/// May be fulfilled asynchronously and arbitrarily late; the pending
/// `connect()` suspends until then. Fulfillable at most once — later calls
/// return `false`.
#[derive(Clone)]
pub struct CredentialsRequest {
    tx: Arc<Mutex<Option<oneshot::Sender<SessionCredentials>>>>,
}

impl CredentialsRequest {
    fn new() -> (Self, oneshot::Receiver<SessionCredentials>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Fulfills the request. Returns `false` when already fulfilled or the
    /// requesting attempt is gone.
    pub fn fulfill(&self, credentials: SessionCredentials) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(credentials).is_ok(),
            None => false,
        }
    }
}

// ============================================================================
// Observers
// ============================================================================

#[derive(Default)]
struct Observers {
    needs_credentials: Mutex<Vec<CredentialsCallback>>,
    connecting: Mutex<Vec<Callback>>,
    connected: Mutex<Vec<Callback>>,
    disconnected: Mutex<Vec<Callback>>,
    ready_for_reconnect: Mutex<Vec<Callback>>,
    message: Mutex<Vec<MessageCallback>>,
    closed_by_user: Mutex<Vec<Callback>>,
    needs_reauth: Mutex<Vec<Callback>>,
}

impl Observers {
    fn notify(list: &Mutex<Vec<Callback>>) {
        for callback in list.lock().iter() {
            callback();
        }
    }
}

// ============================================================================
// ConnectionController
// ============================================================================

/// Orchestrates reconnection policy over a single [`SessionEngine`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    engine: SessionEngine,
    observers: Observers,
    reopen_timer: DelayTimer,
    /// Set on a confirmed connection; consumed when `disconnected` is
    /// raised, so the signal fires at most once per connected stretch.
    was_connected: AtomicBool,
    /// Latched by a connectivity-loss close; `stop_reopen_timer` becomes a
    /// no-op from then on so an external connectivity monitor keeps
    /// ownership of the retry loop.
    connectivity_lost: AtomicBool,
    connect_gate: tokio::sync::Mutex<()>,
}

impl ConnectionController {
    /// Creates a controller over the given engine and starts consuming its
    /// events.
    #[must_use]
    pub fn new(engine: SessionEngine) -> Self {
        let events = engine.subscribe();

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<ControllerInner>| {
            let timer_ref = weak.clone();
            let reopen_timer = DelayTimer::new(move || {
                if let Some(inner) = timer_ref.upgrade() {
                    tokio::spawn(ControllerInner::reopen_elapsed(inner));
                }
            });

            ControllerInner {
                engine,
                observers: Observers::default(),
                reopen_timer,
                was_connected: AtomicBool::new(false),
                connectivity_lost: AtomicBool::new(false),
                connect_gate: tokio::sync::Mutex::new(()),
            }
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_session_event(event);
            }
        });

        Self { inner }
    }

    /// Creates a controller with the production WebSocket transport.
    #[must_use]
    pub fn with_default_transport() -> Self {
        Self::new(SessionEngine::new(ws_factory()))
    }

    // ========================================================================
    // Observer Registration
    // ========================================================================

    /// Registers a credentials-request observer.
    pub fn on_needs_credentials(&self, f: impl Fn(CredentialsRequest) + Send + Sync + 'static) {
        self.inner.observers.needs_credentials.lock().push(Box::new(f));
    }

    /// Registers a connecting observer.
    pub fn on_connecting(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.connecting.lock().push(Box::new(f));
    }

    /// Registers a connected observer.
    pub fn on_connected(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.connected.lock().push(Box::new(f));
    }

    /// Registers a disconnected observer.
    pub fn on_disconnected(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.disconnected.lock().push(Box::new(f));
    }

    /// Registers a ready-for-reconnect observer (backend migration ended).
    pub fn on_ready_for_reconnect(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.ready_for_reconnect.lock().push(Box::new(f));
    }

    /// Registers an inbound-message observer.
    pub fn on_message(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.observers.message.lock().push(Box::new(f));
    }

    /// Registers a closed-by-user observer.
    pub fn on_closed_by_user(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.closed_by_user.lock().push(Box::new(f));
    }

    /// Registers a re-authentication-needed observer.
    pub fn on_needs_reauth(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.observers.needs_reauth.lock().push(Box::new(f));
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Connects the session.
    ///
    /// Returns `Ok(true)` immediately when already open — without
    /// re-requesting credentials. Otherwise raises `connecting`, requests
    /// credentials (suspending until the application fulfills them),
    /// initializes and opens the engine. Contract: at most one `connect()`
    /// is in flight at a time; concurrent callers queue on an internal
    /// gate and re-check the open state.
    ///
    /// # Errors
    ///
    /// Transport-layer errors are logged and re-raised to the caller; they
    /// are never retried here.
    pub async fn connect(&self) -> Result<bool> {
        self.inner.connect().await
    }

    /// Closes with an explicit intent, unconditionally delegating to the
    /// engine.
    pub async fn close(&self, mode: CloseMode) {
        self.inner.engine.close(mode).await;
    }

    /// Closes because the application stayed backgrounded.
    ///
    /// No-op unless currently open (idempotent double-close guard); the
    /// close is migration-intended so the foreground transition drives the
    /// reconnect.
    pub async fn close_due_to_background(&self) {
        if !self.inner.engine.is_open() {
            return;
        }
        self.inner.engine.close(CloseMode::ServerMigration).await;
    }

    /// Aborts after an external connectivity loss and latches the
    /// connectivity-lost mode.
    pub fn close_due_to_connectivity_loss(&self) {
        self.inner.connectivity_lost.store(true, Ordering::SeqCst);
        if self.inner.was_connected.swap(false, Ordering::SeqCst) {
            Observers::notify(&self.inner.observers.disconnected);
        }
        self.inner.engine.close_due_to_connectivity_loss();
    }

    /// Latches the engine's migration flag ahead of a backend replacement.
    pub fn prepare_for_migration(&self) {
        self.inner.engine.set_ready_for_migration();
    }

    /// Sends an application payload through the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when no session is live.
    pub async fn send(&self, data: &serde_json::Value) -> Result<()> {
        self.inner.engine.send(data).await
    }

    /// Arms the flat-interval reopen timer.
    pub fn start_reopen_timer(&self) {
        self.inner.start_reopen_timer();
    }

    /// Stops the reopen timer — unless connectivity-loss mode is latched,
    /// in which case the external connectivity monitor owns the retry loop
    /// and this call is a no-op.
    pub fn stop_reopen_timer(&self) {
        if self.inner.connectivity_lost.load(Ordering::SeqCst) {
            return;
        }
        self.inner.reopen_timer.stop();
    }

    /// Whether the underlying transport is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.engine.is_open()
    }
}

// ============================================================================
// ControllerInner
// ============================================================================

impl ControllerInner {
    async fn connect(self: &Arc<Self>) -> Result<bool> {
        if self.engine.is_open() {
            return Ok(true);
        }
        let _gate = self.connect_gate.lock().await;
        if self.engine.is_open() {
            return Ok(true);
        }

        Observers::notify(&self.observers.connecting);

        let (request, receiver) = CredentialsRequest::new();
        for callback in self.observers.needs_credentials.lock().iter() {
            callback(request.clone());
        }
        let credentials = receiver.await.map_err(|_| Error::CredentialsAbandoned)?;

        self.engine.init(credentials)?;
        match self.engine.open().await {
            Ok(true) => {
                Observers::notify(&self.observers.connected);
                self.was_connected.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                warn!(error = %e, "connection failed, network unreachable");
                Err(e)
            }
        }
    }

    /// One reopen tick: reconnect, then stop the timer on success or
    /// stop-and-immediately-restart it on failure. The explicit stop
    /// matters — the timer's enabled flag survives the fire, so a bare
    /// start would be ignored.
    async fn reopen_elapsed(self: Arc<Self>) {
        let reconnected = match self.connect().await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "reconnect attempt failed");
                false
            }
        };

        self.reopen_timer.stop();
        if !reconnected {
            self.start_reopen_timer();
        }
    }

    fn start_reopen_timer(&self) {
        if let Err(e) = self.reopen_timer.start(REOPEN_INTERVAL_SECS) {
            warn!(error = %e, "reopen timer start failed");
        }
    }

    fn handle_session_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Message(body) => {
                for callback in self.observers.message.lock().iter() {
                    callback(&body);
                }
            }
            SessionEvent::NeedsReauth => Observers::notify(&self.observers.needs_reauth),
            SessionEvent::Closed(cause) => self.dispatch_closure(cause),
        }
    }

    /// Runs once per engine closure notification.
    fn dispatch_closure(&self, cause: DisconnectCause) {
        if self.was_connected.swap(false, Ordering::SeqCst) {
            Observers::notify(&self.observers.disconnected);
        }

        match cause {
            // Resumption is driven externally by the foreground transition.
            DisconnectCause::BackgroundSuspend => {}
            DisconnectCause::ServerMigration => {
                Observers::notify(&self.observers.ready_for_reconnect);
            }
            // Terminal until external re-authentication.
            DisconnectCause::AuthFailure => {}
            DisconnectCause::Unclassified => {
                debug!("unclassified closure, arming reopen timer");
                self.start_reopen_timer();
            }
            DisconnectCause::UserInitiated => {
                Observers::notify(&self.observers.closed_by_user);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
