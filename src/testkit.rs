//! Test doubles shared by the unit tests.
//!
//! The transport seam is constructor-injected, so tests drive the session
//! layer entirely through a scripted in-memory transport: no sockets, no
//! real endpoints, deterministic event ordering.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;
use crate::stomp::{Frame, codec};
use crate::transport::{
    AffinityCookie, REASON_CONNECT_FAILURE, Transport, TransportEvent, TransportFactory,
};

// ============================================================================
// FakeMode
// ============================================================================

/// How a scripted transport behaves on `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeMode {
    /// Emit `Opened`, then an authenticated MESSAGE frame: the handshake
    /// confirms without further scripting.
    AutoConfirm,
    /// Emit `Opened` only; the test scripts the rest.
    OpenOnly,
    /// Report a dial failure through the abnormal-close event.
    FailConnect,
}

// ============================================================================
// FakeTransport
// ============================================================================

/// Scripted in-memory transport recording every interaction.
pub(crate) struct FakeTransport {
    mode: FakeMode,
    /// Events emitted before a subscriber exists are buffered and flushed
    /// on subscription, keeping test scripts race-free.
    buffered: Mutex<Vec<TransportEvent>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    pub(crate) sent: Mutex<Vec<String>>,
    pub(crate) close_calls: Mutex<Vec<(u16, String)>>,
    pub(crate) cookies: Mutex<Vec<AffinityCookie>>,
    aborts: AtomicUsize,
    connects: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new(mode: FakeMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            buffered: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            close_calls: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        })
    }

    /// Emits a raw transport event to the subscriber (or the buffer).
    pub(crate) fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        } else {
            self.buffered.lock().push(event);
        }
    }

    /// Emits a raw text message.
    pub(crate) fn emit_text(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    /// Emits a frame wrapped in the `a`-prefixed JSON-array envelope.
    pub(crate) fn emit_frame(&self, frame: &Frame) {
        let envelope = codec::encode_envelope(frame).expect("envelope");
        self.emit_text(&format!("a{envelope}"));
    }

    pub(crate) fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FakeMode::AutoConfirm => {
                self.emit(TransportEvent::Opened);
                self.emit_frame(&Frame::with_body(
                    crate::stomp::command::MESSAGE,
                    "confirmed",
                ));
            }
            FakeMode::OpenOnly => self.emit(TransportEvent::Opened),
            FakeMode::FailConnect => self.emit(TransportEvent::Closed {
                code: 1006,
                reason: REASON_CONNECT_FAILURE.to_string(),
                clean: false,
            }),
        }
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        self.close_calls.lock().push((code, reason.to_string()));
        Ok(())
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn set_affinity_cookie(&self, cookie: AffinityCookie) {
        self.cookies.lock().push(cookie);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.buffered.lock().drain(..) {
            let _ = tx.send(event);
        }
        *self.events.lock() = Some(tx);
        rx
    }
}

// ============================================================================
// FakeHub
// ============================================================================

/// Factory handing one scripted transport per connection attempt and
/// keeping every created instance for inspection.
pub(crate) struct FakeHub {
    mode: FakeMode,
    pub(crate) transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeHub {
    pub(crate) fn new(mode: FakeMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            transports: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn factory(self: &Arc<Self>) -> TransportFactory {
        let hub = Arc::clone(self);
        Box::new(move |_url: &Url| {
            let transport = FakeTransport::new(hub.mode);
            hub.transports.lock().push(Arc::clone(&transport));
            transport as Arc<dyn Transport>
        })
    }

    /// The most recently created transport.
    pub(crate) fn latest(&self) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .last()
            .cloned()
            .expect("no transport created yet")
    }

    /// Number of connection attempts made so far.
    pub(crate) fn attempts(&self) -> usize {
        self.transports.lock().len()
    }

    /// Yields until the latest transport has been dialed, so scripted
    /// events land after the engine subscribed.
    pub(crate) async fn wait_for_transport(&self) -> Arc<FakeTransport> {
        loop {
            let connected = self
                .transports
                .lock()
                .last()
                .filter(|t| t.connect_count() > 0)
                .cloned();
            if let Some(transport) = connected {
                return transport;
            }
            tokio::task::yield_now().await;
        }
    }
}
