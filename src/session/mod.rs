//! Session layer: engine, lifecycle types, keep-alive pinger.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `engine` | [`SessionEngine`]: handshake, dispatch, watchdog, close classification |
//! | `keepalive` | periodic keep-alive HTTP pinger (internal) |

// ============================================================================
// Submodules
// ============================================================================

/// Session engine.
pub mod engine;

/// Keep-alive pinger.
pub(crate) mod keepalive;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::SessionEngine;

// ============================================================================
// DisconnectCause
// ============================================================================

/// Why a session closed. Exactly one cause accompanies every closure
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectCause {
    /// User closed the connection on log out.
    UserInitiated,
    /// Should be reconnected on entering foreground.
    BackgroundSuspend,
    /// Should be reconnected once the backend migration ends.
    ServerMigration,
    /// Have to repeat the authorization process.
    AuthFailure,
    /// Have to attempt reconnection periodically by timer.
    Unclassified,
}

// ============================================================================
// CloseMode
// ============================================================================

/// Intent behind a requested close; maps onto the same-named
/// [`DisconnectCause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Deliberate user action.
    UserInitiated,
    /// The application is entering the background.
    BackgroundSuspend,
    /// The backend instance is being replaced.
    ServerMigration,
}

impl CloseMode {
    /// The closure cause this mode maps to.
    #[inline]
    #[must_use]
    pub const fn cause(self) -> DisconnectCause {
        match self {
            Self::UserInitiated => DisconnectCause::UserInitiated,
            Self::BackgroundSuspend => DisconnectCause::BackgroundSuspend,
            Self::ServerMigration => DisconnectCause::ServerMigration,
        }
    }
}

// ============================================================================
// TransportPhase
// ============================================================================

/// Transport side of the session state. A session is usable only when the
/// phase is [`Open`](TransportPhase::Open) and the handshake is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPhase {
    /// No live channel.
    #[default]
    Closed,
    /// Dial in progress.
    Connecting,
    /// Duplex channel established.
    Open,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Notifications the engine emits to the connection controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An application payload arrived on the subscribed queue.
    Message(String),
    /// Credentials were likely rotated server-side; re-authenticate before
    /// the next connect.
    NeedsReauth,
    /// The session closed; timers are already stopped.
    Closed(DisconnectCause),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_mode_maps_to_cause() {
        assert_eq!(CloseMode::UserInitiated.cause(), DisconnectCause::UserInitiated);
        assert_eq!(
            CloseMode::BackgroundSuspend.cause(),
            DisconnectCause::BackgroundSuspend
        );
        assert_eq!(
            CloseMode::ServerMigration.cause(),
            DisconnectCause::ServerMigration
        );
    }

    #[test]
    fn test_default_phase_is_closed() {
        assert_eq!(TransportPhase::default(), TransportPhase::Closed);
    }
}
