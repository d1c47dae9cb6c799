//! Notifications published to session subscribers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;

use super::state::AuthMode;

// ============================================================================
// Constants
// ============================================================================

/// Buffered notifications per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// SessionEvent
// ============================================================================

/// A session notification.
///
/// Delivered to every receiver returned by `Session::events`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A stream to the client was established.
    Connected,
    /// The stream closed, expectedly or not.
    Disconnected,
    /// Authentication completed.
    Authenticated {
        /// How it completed.
        mode: AuthMode,
    },
    /// The client dispatched `READY`.
    Ready(Value),
    /// Something went wrong outside any caller's request.
    Error(Arc<Error>),
    /// Any other dispatched event.
    Dispatch {
        /// Event name.
        event: String,
        /// Event payload.
        data: Value,
    },
    /// An inbound frame that matched no request and is not a dispatch.
    Message(Value),
}

impl SessionEvent {
    /// Wraps an error.
    #[inline]
    #[must_use]
    pub fn error(err: Error) -> Self {
        Self::Error(Arc::new(err))
    }
}
