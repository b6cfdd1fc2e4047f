//! Session engine: owns one transport per attempt, drives the STOMP
//! handshake and subscription, runs the idle watchdog and keep-alive ping,
//! and classifies closure causes.
//!
//! # Lifecycle
//!
//! 1. [`SessionEngine::init`] — derive a fresh connection address, build a
//!    transport through the injected factory, reset the handshake future.
//! 2. [`SessionEngine::open`] — subscribe to transport events, dial, then
//!    suspend until the handshake future resolves. The handshake is
//!    confirmed by the first authenticated MESSAGE frame; a CONNECTED frame
//!    alone proves nothing about the subscription.
//! 3. Inbound traffic keeps re-arming the idle watchdog; silence for the
//!    watchdog interval aborts the session as [`DisconnectCause::Unclassified`].
//! 4. [`SessionEngine::close`] / abort — timers stopped, listeners
//!    unsubscribed, transport discarded, closure notification emitted
//!    exactly once per engine lifetime.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::credentials::SessionCredentials;
use crate::error::{Error, Result};
use crate::stomp::frame::command;
use crate::stomp::{Frame, codec};
use crate::timer::DelayTimer;
use crate::transport::{
    AffinityCookie, REASON_CONNECT_FAILURE, REASON_RECEIVE_FAILURE, Transport, TransportEvent,
    TransportFactory,
};

use super::keepalive::KeepAlive;
use super::{CloseMode, DisconnectCause, SessionEvent, TransportPhase};

// ============================================================================
// Constants
// ============================================================================

/// STOMP virtual host for the CONNECT frame.
const VHOST: &str = "trading";

/// Exchange for outbound application messages.
const EXCHANGE_NAME: &str = "CMD";

/// Negotiated STOMP version.
const STOMP_VERSION: &str = "1.2";

/// Client sends nothing; server heartbeats every 5 seconds.
const STOMP_HEARTBEAT: &str = "0,5000";

/// Fixed id for the single queue subscription.
const SUBSCRIPTION_ID: &str = "sub-0";

/// Seconds of inbound silence before the watchdog declares the connection
/// dead.
const IDLE_TIMEOUT_SECS: u64 = 20;

/// Deadline for the graceful close exchange; the abort path runs
/// unconditionally afterwards.
const CLOSE_DEADLINE: Duration = Duration::from_secs(2);

/// Normal close status code.
const CLOSE_NORMAL: u16 = 1000;

/// Abnormal termination status code.
const CLOSE_ABNORMAL: u16 = 1006;

/// Alphabet for the random session-token path segment.
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz012345";

/// Length of the session-token path segment.
const TOKEN_LENGTH: usize = 8;

/// Exclusive upper bound for the numeric affinity-id path segment.
const MAX_AFFINITY_ID: u16 = 1000;

// ============================================================================
// SessionEngine
// ============================================================================

/// Session and reconnection engine for a single logical subscription.
///
/// One engine instance is live per connection controller; a fresh transport
/// is created per attempt through the injected factory so tests substitute
/// fakes directly.
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    factory: TransportFactory,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    /// Suppresses one abnormal-close classification while a backend
    /// migration is pending. Consumed exactly once, by close
    /// classification only; the idle watchdog reads it without consuming.
    ready_for_migration: AtomicBool,
    state: Mutex<EngineState>,
}

#[derive(Default)]
struct EngineState {
    credentials: Option<SessionCredentials>,
    transport: Option<Arc<dyn Transport>>,
    phase: TransportPhase,
    confirmed: bool,
    handshake_tx: Option<oneshot::Sender<bool>>,
    handshake_rx: Option<oneshot::Receiver<bool>>,
    watchdog: Option<DelayTimer>,
    keepalive: Option<KeepAlive>,
    pump: Option<JoinHandle<()>>,
}

impl SessionEngine {
    /// Creates an engine over the given transport factory.
    #[must_use]
    pub fn new(factory: TransportFactory) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                factory,
                events: Mutex::new(None),
                ready_for_migration: AtomicBool::new(false),
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Subscribes to session events, replacing any previous subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock() = Some(tx);
        rx
    }

    /// Prepares a fresh connection attempt.
    ///
    /// Derives a new connection address (random affinity id and session
    /// token per attempt, supporting sticky routing), builds the transport,
    /// resets the handshake future and recreates the idle watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the credentials host does
    /// not form a valid URL.
    pub fn init(&self, credentials: SessionCredentials) -> Result<()> {
        let url = connection_url(credentials.host())?;
        debug!(url = %url, "session address derived");
        let transport = (self.inner.factory)(&url);

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let watchdog = {
            let weak = Arc::downgrade(&self.inner);
            DelayTimer::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.watchdog_elapsed();
                }
            })
        };

        let mut state = self.inner.state.lock();
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        state.credentials = Some(credentials);
        state.transport = Some(transport);
        state.phase = TransportPhase::Closed;
        state.confirmed = false;
        state.handshake_tx = Some(handshake_tx);
        state.handshake_rx = Some(handshake_rx);
        state.watchdog = Some(watchdog);
        state.keepalive = None;
        Ok(())
    }

    /// Opens the session: dials the transport and waits for the handshake
    /// to resolve.
    ///
    /// Returns `Ok(false)` when no transport handle exists (missing
    /// [`init`](Self::init)) or when the handshake resolves unconfirmed —
    /// a failed attempt for the caller's reconnection policy. On success
    /// the keep-alive pinger starts with cookie state rebuilt from the
    /// credentials.
    ///
    /// # Errors
    ///
    /// Pre-network transport errors propagate to the caller; network-level
    /// dial failures resolve the handshake `false` instead.
    pub async fn open(&self) -> Result<bool> {
        let (transport, handshake_rx, cookie) = {
            let mut state = self.inner.state.lock();
            let Some(transport) = state.transport.clone() else {
                return Ok(false);
            };
            let Some(handshake_rx) = state.handshake_rx.take() else {
                return Ok(false);
            };

            if state.pump.is_none() {
                let events = transport.subscribe();
                let pump = tokio::spawn(Arc::clone(&self.inner).run_event_pump(events));
                state.pump = Some(pump);
            }

            let cookie = state.credentials.as_ref().and_then(|creds| {
                creds.affinity().map(|token| AffinityCookie {
                    name: "WEBSRV".to_string(),
                    value: token.to_string(),
                    path: "/".to_string(),
                    domain: creds.domain().to_string(),
                })
            });

            state.phase = TransportPhase::Connecting;
            (transport, handshake_rx, cookie)
        };

        if let Some(cookie) = cookie {
            transport.set_affinity_cookie(cookie);
        }
        transport.connect().await?;

        // An abort drops the sender, resolving this to an unconfirmed
        // attempt.
        let confirmed = handshake_rx.await.unwrap_or(false);
        if confirmed {
            let mut state = self.inner.state.lock();
            state.confirmed = true;
            state.keepalive = state.credentials.as_ref().map(KeepAlive::start);
        }
        Ok(confirmed)
    }

    /// Sends an application payload to the command exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when no transport is live.
    pub async fn send(&self, data: &serde_json::Value) -> Result<()> {
        let transport = self
            .inner
            .state
            .lock()
            .transport
            .clone()
            .ok_or(Error::ConnectionClosed)?;

        let frame = Frame::with_body(command::SEND, data.to_string())
            .header_entry("destination", format!("/exchange/{EXCHANGE_NAME}/"));
        let payload = codec::encode_envelope(&frame)?;
        transport.send(&payload).await
    }

    /// Closes the session with the given intent.
    ///
    /// No-op unless a transport exists and is open. Attempts a graceful
    /// close bounded by a fixed deadline, then aborts unconditionally with
    /// the cause mapped from `mode`.
    pub async fn close(&self, mode: CloseMode) {
        let transport = {
            let state = self.inner.state.lock();
            match (&state.transport, state.phase) {
                (Some(transport), TransportPhase::Open) => Arc::clone(transport),
                _ => return,
            }
        };

        match tokio::time::timeout(CLOSE_DEADLINE, transport.close(CLOSE_NORMAL, "Close by client"))
            .await
        {
            Ok(Ok(())) => debug!("socket closed by client"),
            Ok(Err(e)) => debug!(error = %e, "graceful close failed"),
            Err(_) => debug!("graceful close deadline elapsed"),
        }

        self.inner.abort(mode.cause());
    }

    /// Aborts immediately after an external connectivity loss.
    pub fn close_due_to_connectivity_loss(&self) {
        self.inner.abort(DisconnectCause::Unclassified);
    }

    /// Latches the migration flag: the next abnormal close with a known
    /// status code is swallowed instead of classified.
    pub fn set_ready_for_migration(&self) {
        self.inner.ready_for_migration.store(true, Ordering::SeqCst);
    }

    /// Current transport phase.
    #[must_use]
    pub fn phase(&self) -> TransportPhase {
        self.inner.state.lock().phase
    }

    /// Whether the transport is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase() == TransportPhase::Open
    }
}

// ============================================================================
// EngineInner - Event Pump
// ============================================================================

impl EngineInner {
    async fn run_event_pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => self.handle_opened().await,
                TransportEvent::Message(text) => self.handle_message(&text),
                TransportEvent::Error(info) => debug!(info = %info, "transport error"),
                TransportEvent::Closed { code, reason, clean } => {
                    self.handle_closed(code, &reason, clean);
                }
            }
        }
        trace!("event pump ended");
    }

    /// Transport opened: run the CONNECT + SUBSCRIBE handshake.
    async fn handle_opened(&self) {
        let (transport, frames) = {
            let mut state = self.state.lock();
            state.phase = TransportPhase::Open;
            let (Some(transport), Some(creds)) =
                (state.transport.clone(), state.credentials.as_ref())
            else {
                return;
            };
            (transport, [connect_frame(creds), subscribe_frame(creds)])
        };

        for frame in frames {
            let send = codec::encode_envelope(&frame)
                .map(|payload| (frame.command().to_string(), payload));
            match send {
                Ok((cmd, payload)) => {
                    if let Err(e) = transport.send(&payload).await {
                        // Handshake sends are fire-and-forget; a dead
                        // channel shows up through the close path.
                        warn!(error = %e, command = cmd, "handshake frame send failed");
                    }
                }
                Err(e) => warn!(error = %e, "handshake frame encoding failed"),
            }
        }
    }

    /// Dispatches one raw transport message.
    fn handle_message(&self, text: &str) {
        {
            let state = self.state.lock();
            if state.confirmed
                && let Some(watchdog) = &state.watchdog
            {
                // Any inbound traffic proves liveness; re-arm.
                watchdog.stop();
                if let Err(e) = watchdog.start(IDLE_TIMEOUT_SECS) {
                    warn!(error = %e, "idle watchdog restart failed");
                }
            }
        }

        let Some(kind) = text.chars().next() else {
            trace!("empty transport message dropped");
            return;
        };
        match kind {
            'o' => {
                debug!("opened message received");
                return;
            }
            'h' => {
                trace!("heartbeat received");
                return;
            }
            _ => {}
        }

        let payload = &text[kind.len_utf8()..];
        if payload.is_empty() {
            return;
        }

        let texts = match codec::decode_envelope(payload) {
            Ok(texts) => texts,
            Err(e) => {
                warn!(error = %e, "socket message parsing failed");
                return;
            }
        };

        for item in texts {
            let Some(frame) = codec::deserialize(&item) else {
                trace!("empty frame element dropped");
                continue;
            };

            match frame.command() {
                command::CONNECTED => {
                    // STOMP connected; the session is confirmed only by the
                    // first MESSAGE off the subscribed queue.
                    debug!("socket is now connected, waiting for subscription to queue");
                    return;
                }
                command::MESSAGE => {
                    self.resolve_handshake(true);
                }
                command::ERROR => {
                    let message = frame.header("message").to_string();
                    warn!(message = %message, body = frame.body(), "socket message error");
                    if message == "Bad CONNECT" {
                        // CONNECT frame rejected.
                        self.resolve_handshake(false);
                        self.abort(DisconnectCause::AuthFailure);
                        return;
                    }
                    if message == "not_found" {
                        // Queue gone: credentials were likely rotated.
                        self.resolve_handshake(false);
                        self.abort(DisconnectCause::AuthFailure);
                        self.emit(SessionEvent::NeedsReauth);
                        return;
                    }
                }
                _ => {}
            }

            self.emit(SessionEvent::Message(frame.body().to_string()));
        }
    }

    /// Classifies a transport close event.
    fn handle_closed(&self, code: u16, reason: &str, clean: bool) {
        debug!(code, reason, clean, "socket closed");
        match code {
            CLOSE_ABNORMAL => {
                if reason == REASON_CONNECT_FAILURE {
                    // Unable to open the channel at all.
                    self.resolve_handshake(false);
                    self.abort(DisconnectCause::AuthFailure);
                } else if reason == REASON_RECEIVE_FAILURE {
                    self.abort(DisconnectCause::Unclassified);
                }
            }
            CLOSE_NORMAL => {}
            code if is_known_close_code(code) => {
                if self.ready_for_migration.swap(false, Ordering::SeqCst) {
                    debug!("close swallowed, backend migration pending");
                } else {
                    self.abort(DisconnectCause::Unclassified);
                }
            }
            _ => self.abort(DisconnectCause::Unclassified),
        }
    }

    /// Idle watchdog fired: the connection went silent.
    fn watchdog_elapsed(&self) {
        if self.state.lock().phase == TransportPhase::Closed
            || self.ready_for_migration.load(Ordering::SeqCst)
        {
            return;
        }
        debug!("idle watchdog elapsed, aborting silent connection");
        self.abort(DisconnectCause::Unclassified);
    }

    /// Resolves the handshake future if still pending.
    fn resolve_handshake(&self, confirmed: bool) {
        if let Some(tx) = self.state.lock().handshake_tx.take() {
            let _ = tx.send(confirmed);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Tears the session down and raises the closure notification.
    ///
    /// At most once per engine lifetime: subsequent calls find no transport
    /// and return. Timers stop before the notification fires, so no timer
    /// callback can race a later open.
    fn abort(&self, cause: DisconnectCause) {
        let (transport, pump, watchdog, keepalive) = {
            let mut state = self.state.lock();
            state.confirmed = false;
            let Some(transport) = state.transport.take() else {
                return;
            };
            state.phase = TransportPhase::Closed;
            state.handshake_tx.take();
            (
                transport,
                state.pump.take(),
                state.watchdog.take(),
                state.keepalive.take(),
            )
        };

        if let Some(keepalive) = keepalive {
            keepalive.stop();
        }
        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }
        if let Some(pump) = pump {
            pump.abort();
        }
        transport.abort();

        debug!(?cause, "session aborted");
        self.emit(SessionEvent::Closed(cause));
    }
}

// ============================================================================
// Handshake Frames
// ============================================================================

fn connect_frame(creds: &SessionCredentials) -> Frame {
    Frame::new(command::CONNECT)
        .header_entry("login", creds.principal())
        .header_entry("passcode", creds.secret())
        .header_entry("host", VHOST)
        .header_entry("accept-version", STOMP_VERSION)
        .header_entry("heart-beat", STOMP_HEARTBEAT)
}

fn subscribe_frame(creds: &SessionCredentials) -> Frame {
    Frame::new(command::SUBSCRIBE)
        .header_entry("id", SUBSCRIPTION_ID)
        .header_entry("destination", format!("/amq/queue/{}", creds.session()))
}

// ============================================================================
// Connection Address
// ============================================================================

/// Derives a per-attempt connection address with random path segments for
/// backend instance pinning.
fn connection_url(host: &str) -> Result<Url> {
    let mut rng = rand::rng();
    let affinity_id = rng.random_range(0..MAX_AFFINITY_ID);
    let token: String = (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();

    Url::parse(&format!("wss://{host}/stomp/{affinity_id}/{token}/websocket"))
        .map_err(|e| Error::invalid_argument(format!("invalid host {host:?}: {e}")))
}

fn is_known_close_code(code: u16) -> bool {
    matches!(code, 1000..=1011 | 1015)
}

// ============================================================================
// Tests
// ============================================================================
