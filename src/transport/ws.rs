//! WebSocket transport and event loop.
//!
//! One [`WsTransport`] backs one dial attempt. After a successful dial the
//! transport spawns an event loop task that owns the socket and handles:
//!
//! - Incoming text frames, forwarded as [`TransportEvent::Message`]
//! - Outgoing sends and graceful closes from an internal command channel
//! - Close and error propagation as [`TransportEvent::Closed`]
//!
//! Dial failures never surface as `Err`: they are reported through the
//! event stream as an abnormal close carrying
//! [`REASON_CONNECT_FAILURE`](super::REASON_CONNECT_FAILURE) so the session
//! engine's close classification stays the single decision point.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{
    AffinityCookie, REASON_CONNECT_FAILURE, REASON_RECEIVE_FAILURE, Transport, TransportEvent,
};

// ============================================================================
// Constants
// ============================================================================

/// Close code reported for abnormal termination (no closing handshake).
const CLOSE_CODE_ABNORMAL: u16 = 1006;

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Internal commands for the event loop.
enum WsCommand {
    /// Send a text payload.
    Send {
        text: String,
        done: oneshot::Sender<Result<()>>,
    },
    /// Send a close frame and end the loop.
    Close {
        code: u16,
        reason: String,
        done: oneshot::Sender<Result<()>>,
    },
}

// ============================================================================
// WsTransport
// ============================================================================

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    url: Url,
    cookie: Mutex<Option<AffinityCookie>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Creates a transport for the given endpoint. No IO happens until
    /// [`connect`](Transport::connect).
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            inner: Arc::new(WsInner {
                url,
                cookie: Mutex::new(None),
                events: Mutex::new(None),
                command_tx: Mutex::new(None),
                event_loop: Mutex::new(None),
            }),
        }
    }
}

impl WsInner {
    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Event loop that owns the socket.
    async fn run_event_loop(self: Arc<Self>, ws: WsStream, mut command_rx: mpsc::UnboundedReceiver<WsCommand>) {
        let (mut ws_write, mut ws_read) = ws.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.emit(TransportEvent::Message(text.to_string()));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((CLOSE_CODE_ABNORMAL, String::new()));
                            debug!(code, reason = %reason, "WebSocket closed by remote");
                            self.emit(TransportEvent::Closed { code, reason, clean: true });
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket receive error");
                            self.emit(TransportEvent::Error(e.to_string()));
                            self.emit(TransportEvent::Closed {
                                code: CLOSE_CODE_ABNORMAL,
                                reason: REASON_RECEIVE_FAILURE.to_string(),
                                clean: false,
                            });
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            self.emit(TransportEvent::Closed {
                                code: CLOSE_CODE_ABNORMAL,
                                reason: String::new(),
                                clean: false,
                            });
                            break;
                        }

                        // Binary payloads are not part of the sub-protocol;
                        // ping/pong are handled by tungstenite.
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(WsCommand::Send { text, done }) => {
                            let result = ws_write
                                .send(Message::Text(text.into()))
                                .await
                                .map_err(Error::from);
                            let _ = done.send(result);
                        }

                        Some(WsCommand::Close { code, reason, done }) => {
                            let frame = CloseFrame {
                                code: code.into(),
                                reason: reason.clone().into(),
                            };
                            let result = ws_write
                                .send(Message::Close(Some(frame)))
                                .await
                                .map_err(Error::from);
                            let _ = done.send(result);
                            debug!(code, "socket closed by client");
                            self.emit(TransportEvent::Closed { code, reason, clean: true });
                            break;
                        }

                        None => {
                            trace!("command channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Transport Impl
// ============================================================================

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<()> {
        let mut request = self.inner.url.as_str().into_client_request()?;

        if let Some(cookie) = self.inner.cookie.lock().clone() {
            let value = HeaderValue::from_str(&cookie.header_value())
                .map_err(|e| Error::invalid_argument(format!("affinity cookie: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        match connect_async(request).await {
            Ok((ws, _response)) => {
                debug!(url = %self.inner.url, "WebSocket connection established");

                let (command_tx, command_rx) = mpsc::unbounded_channel();
                *self.inner.command_tx.lock() = Some(command_tx);

                // Opened goes out before the reader starts so no inbound
                // message can overtake it.
                self.inner.emit(TransportEvent::Opened);

                let handle = tokio::spawn(Arc::clone(&self.inner).run_event_loop(ws, command_rx));
                *self.inner.event_loop.lock() = Some(handle);
                Ok(())
            }
            Err(WsError::Url(e)) => Err(Error::invalid_argument(e.to_string())),
            Err(e) => {
                warn!(error = %e, url = %self.inner.url, "WebSocket dial failed");
                self.inner.emit(TransportEvent::Error(e.to_string()));
                self.inner.emit(TransportEvent::Closed {
                    code: CLOSE_CODE_ABNORMAL,
                    reason: REASON_CONNECT_FAILURE.to_string(),
                    clean: false,
                });
                Ok(())
            }
        }
    }

    async fn send(&self, text: &str) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = {
            let guard = self.inner.command_tx.lock();
            match guard.as_ref() {
                Some(tx) => tx
                    .send(WsCommand::Send {
                        text: text.to_string(),
                        done: done_tx,
                    })
                    .is_ok(),
                None => false,
            }
        };
        if !sent {
            return Err(Error::ConnectionClosed);
        }
        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = {
            let guard = self.inner.command_tx.lock();
            match guard.as_ref() {
                Some(tx) => tx
                    .send(WsCommand::Close {
                        code,
                        reason: reason.to_string(),
                        done: done_tx,
                    })
                    .is_ok(),
                None => false,
            }
        };
        if !sent {
            return Err(Error::ConnectionClosed);
        }
        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    fn abort(&self) {
        self.inner.command_tx.lock().take();
        if let Some(handle) = self.inner.event_loop.lock().take() {
            handle.abort();
        }
        trace!("transport aborted");
    }

    fn set_affinity_cookie(&self, cookie: AffinityCookie) {
        *self.inner.cookie.lock() = Some(cookie);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock() = Some(tx);
        rx
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    /// Binds a throwaway WebSocket echo server, returning its URL and a
    /// handle to the accept task.
    async fn spawn_server() -> (Url, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");

            ws.send(Message::Text("a[\"hello\"]".into()))
                .await
                .expect("server send");

            // Echo one client payload back, then close.
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.expect("echo");
            }
            let _ = ws.close(None).await;
        });

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        (url, handle)
    }

    #[tokio::test]
    async fn test_connect_emits_opened_then_messages() {
        let (url, server) = spawn_server().await;
        let transport = WsTransport::new(url);
        let mut events = transport.subscribe();

        transport.connect().await.expect("connect");
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("a[\"hello\"]".to_string()))
        );

        transport.send("ping").await.expect("send");
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("ping".to_string()))
        );

        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_dial_failure_reports_connect_reason() {
        // Grab a port that is certainly closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let transport = WsTransport::new(url);
        let mut events = transport.subscribe();

        transport.connect().await.expect("dial failure is not Err");

        let mut closed = None;
        while let Some(event) = events.recv().await {
            if let TransportEvent::Closed { code, reason, clean } = event {
                closed = Some((code, reason, clean));
                break;
            }
        }
        let (code, reason, clean) = closed.expect("closed event");
        assert_eq!(code, 1006);
        assert_eq!(reason, REASON_CONNECT_FAILURE);
        assert!(!clean);
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let url = Url::parse("ws://127.0.0.1:9").expect("url");
        let transport = WsTransport::new(url);
        assert!(matches!(
            transport.send("x").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_emits_clean_closed_event() {
        let (url, _server) = spawn_server().await;
        let transport = WsTransport::new(url);
        let mut events = transport.subscribe();

        transport.connect().await.expect("connect");
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        transport.close(1000, "Close by client").await.expect("close");

        let mut closed = None;
        while let Some(event) = events.recv().await {
            if let TransportEvent::Closed { code, clean, .. } = event {
                closed = Some((code, clean));
                break;
            }
        }
        assert_eq!(closed, Some((1000, true)));
    }

    #[tokio::test]
    async fn test_abort_silences_events() {
        let (url, _server) = spawn_server().await;
        let transport = WsTransport::new(url);
        let mut events = transport.subscribe();

        transport.connect().await.expect("connect");
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));

        transport.abort();
        assert!(matches!(
            transport.send("x").await,
            Err(Error::ConnectionClosed)
        ));
    }
}
