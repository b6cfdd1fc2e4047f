//! Duplex transport capability.
//!
//! The session engine consumes the transport as an abstract capability so
//! tests substitute fakes directly; [`WsTransport`] is the production
//! implementation.
//!
//! ```text
//! ┌──────────────────┐                         ┌──────────────────┐
//! │  SessionEngine   │        WebSocket        │  STOMP endpoint  │
//! │                  │◄───────────────────────►│  (SockJS-style   │
//! │  Arc<dyn         │   wss://host/stomp/..   │   multiplexer)   │
//! │    Transport>    │                         │                  │
//! └──────────────────┘                         └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `ws` | tokio-tungstenite transport with an internal event loop |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket transport implementation.
pub mod ws;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use ws::WsTransport;

// ============================================================================
// Constants
// ============================================================================

/// Close reason reported when the dial itself fails.
///
/// The session engine classifies an abnormal close carrying this reason as
/// an authorization failure; every [`Transport`] implementation must use it
/// verbatim.
pub const REASON_CONNECT_FAILURE: &str = "An exception has occurred while connecting.";

/// Close reason reported when receiving fails mid-session.
///
/// Classified as a transient loss, recovered by the flat-interval reopen
/// policy.
pub const REASON_RECEIVE_FAILURE: &str = "An exception has occurred while receiving.";

// ============================================================================
// TransportEvent
// ============================================================================

/// Notifications emitted by a transport to its single subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The duplex channel is established.
    Opened,
    /// A raw text message arrived.
    Message(String),
    /// A transport-level error was observed; a `Closed` event follows.
    Error(String),
    /// The channel closed.
    Closed {
        /// WebSocket close code (1006 for abnormal termination).
        code: u16,
        /// Close reason text.
        reason: String,
        /// Whether the closing handshake completed.
        clean: bool,
    },
}

// ============================================================================
// AffinityCookie
// ============================================================================

/// Cookie pinning the connection to one backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityCookie {
    /// Cookie name.
    pub name: String,
    /// Opaque affinity token.
    pub value: String,
    /// Cookie path.
    pub path: String,
    /// Cookie domain.
    pub domain: String,
}

impl AffinityCookie {
    /// Renders the `Cookie` request-header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Abstract duplex channel used by the session engine.
///
/// One subscriber at a time: [`subscribe`](Transport::subscribe) replaces
/// any previous event receiver. Events emitted before the first subscription
/// are dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the channel.
    ///
    /// A network-level dial failure is reported through the event stream as
    /// `Closed {1006, REASON_CONNECT_FAILURE, false}` rather than an `Err`,
    /// so close classification sees it; only pre-network failures (invalid
    /// URL or cookie value) surface as errors.
    async fn connect(&self) -> Result<()>;

    /// Sends a text payload.
    async fn send(&self, text: &str) -> Result<()>;

    /// Initiates a graceful close with the given code and reason.
    ///
    /// Callers bound this with their own deadline; the abort path runs
    /// unconditionally afterwards.
    async fn close(&self, code: u16, reason: &str) -> Result<()>;

    /// Tears the channel down immediately, without a closing handshake.
    fn abort(&self);

    /// Attaches the server-affinity cookie to the next dial.
    fn set_affinity_cookie(&self, cookie: AffinityCookie);

    /// Subscribes to transport events, replacing any previous subscriber.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Constructor-injected transport factory, one transport per attempt.
pub type TransportFactory = Box<dyn Fn(&Url) -> Arc<dyn Transport> + Send + Sync>;

/// Factory producing the production [`WsTransport`].
#[must_use]
pub fn ws_factory() -> TransportFactory {
    Box::new(|url| Arc::new(WsTransport::new(url.clone())) as Arc<dyn Transport>)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_cookie_header_value() {
        let cookie = AffinityCookie {
            name: "WEBSRV".to_string(),
            value: "srv-3".to_string(),
            path: "/".to_string(),
            domain: "example.com".to_string(),
        };
        assert_eq!(cookie.header_value(), "WEBSRV=srv-3");
    }

    #[test]
    fn test_failure_reasons_are_distinct() {
        assert_ne!(REASON_CONNECT_FAILURE, REASON_RECEIVE_FAILURE);
    }
}
