//! Resilient STOMP-over-WebSocket session layer.
//!
//! This library keeps a logical queue subscription alive over an
//! unreliable, lifecycle-constrained transport — a mobile client that can
//! be suspended, backgrounded, or migrated between backend instances. It
//! multiplexes STOMP-like framing over one persistent duplex channel,
//! detects silent failures with an idle watchdog, classifies every
//! disconnection, and exposes a request/response-free message bus.
//!
//! # Architecture
//!
//! ```text
//! application ──credentials──► ConnectionController ──► SessionEngine ──► Transport
//! application ◄──lifecycle───  ConnectionController ◄── SessionEngine ◄── Transport
//! ```
//!
//! Key design principles:
//!
//! - One live [`SessionEngine`] per controller; a fresh transport per
//!   attempt through an injected factory
//! - A session is usable only once the first authenticated MESSAGE frame
//!   arrives — a CONNECTED frame alone proves nothing
//! - Closure causes form a closed set; each drives one recovery policy
//!   (flat-interval retry, external re-auth, migration wait, nothing)
//! - Per-signal observer lists instead of a monolithic dispatcher
//!
//! # Quick Start
//!
//! ```no_run
//! use stomp_session::{
//!     BackgroundCoordinator, ConnectionController, Result, SessionCredentials,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller = ConnectionController::with_default_transport();
//!
//!     controller.on_needs_credentials(|request| {
//!         let creds = SessionCredentials::new(
//!             "stomp-user", "stomp-pass", "session-id", "um-id",
//!             "broker.example.com", "example.com", None,
//!         )
//!         .expect("credentials");
//!         request.fulfill(creds);
//!     });
//!     controller.on_message(|body| println!("inbound: {body}"));
//!
//!     if controller.connect().await? {
//!         println!("connected");
//!     }
//!
//!     // Wire app-lifecycle transitions.
//!     let coordinator = BackgroundCoordinator::new(controller.clone());
//!     {
//!         let controller = controller.clone();
//!         coordinator.set_close_handler(move || {
//!             let controller = controller.clone();
//!             tokio::spawn(async move { controller.close_due_to_background().await });
//!         });
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`background`] | App-lifecycle coordinator with the grace window |
//! | [`controller`] | [`ConnectionController`]: reconnection policy, notifications |
//! | [`credentials`] | [`SessionCredentials`] value type |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`session`] | [`SessionEngine`], lifecycle types |
//! | [`stomp`] | Frame type and wire codec |
//! | [`timer`] | Single-shot restartable [`DelayTimer`] |
//! | [`transport`] | Transport capability and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Application-lifecycle coordinator.
pub mod background;

/// Connection controller and lifecycle notifications.
pub mod controller;

/// Session credentials.
pub mod credentials;

/// Error types and result alias.
pub mod error;

/// Session engine and lifecycle types.
pub mod session;

/// STOMP framing.
pub mod stomp;

/// Single-shot restartable countdown timer.
pub mod timer;

/// Transport capability and WebSocket implementation.
pub mod transport;

#[cfg(test)]
pub(crate) mod testkit;

// ============================================================================
// Re-exports
// ============================================================================

pub use background::BackgroundCoordinator;
pub use controller::{ConnectionController, CredentialsRequest};
pub use credentials::SessionCredentials;
pub use error::{Error, Result};
pub use session::{CloseMode, DisconnectCause, SessionEngine, SessionEvent, TransportPhase};
pub use stomp::{Frame, codec};
pub use timer::DelayTimer;
pub use transport::{AffinityCookie, Transport, TransportEvent, TransportFactory, WsTransport};
