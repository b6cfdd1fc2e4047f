//! STOMP framing: frame value type and wire codec.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | [`Frame`] value type and command constants |
//! | `codec` | wire serialization and the JSON-array transport envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Frame value type and command constants.
pub mod frame;

/// Wire codec and transport envelope.
pub mod codec;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, command};
