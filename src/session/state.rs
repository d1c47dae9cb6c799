//! Session lifecycle state and the status snapshot.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Instant;

use crate::protocol::Activity;

// ============================================================================
// ConnectionState
// ============================================================================

/// Where the session is in its lifecycle.
///
/// ```text
/// Disconnected → Connecting → Connected → Handshaking → Authenticating → Ready
///      ▲              │            │            │              │          │
///      └──────────────┴────────────┴────────────┴──────────────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Dialing candidate endpoints.
    Connecting,
    /// Stream established.
    Connected,
    /// Handshake frame sent.
    Handshaking,
    /// Authentication command in flight.
    Authenticating,
    /// Authenticated (possibly in basic mode).
    Ready,
}

impl ConnectionState {
    /// Returns `true` once a stream is established.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Handshaking => "handshaking",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

// ============================================================================
// AuthMode
// ============================================================================

/// How the session became authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// `AUTHENTICATE` with a caller-supplied access token.
    Token,
    /// Token-less `AUTHORIZE` succeeded.
    Authorized,
    /// Token-less `AUTHORIZE` failed; running with basic functionality only.
    Basic,
}

impl AuthMode {
    /// Returns `true` for the degraded mode.
    #[inline]
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Basic)
    }
}

// ============================================================================
// SessionStatus
// ============================================================================

/// Point-in-time view of the session, returned by `Session::status`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// A stream is established.
    pub connected: bool,
    /// Authentication completed (including degraded).
    pub authenticated: bool,
    /// How authentication completed, if it did.
    pub auth_mode: Option<AuthMode>,
    /// Configured client ID.
    pub client_id: String,
    /// Last activity set, kept for resubmission after reconnecting.
    pub current_activity: Option<Activity>,
    /// Reconnection attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Last liveness tick or inbound pong.
    pub last_heartbeat: Option<Instant>,
}

impl SessionStatus {
    /// Creates the initial, disconnected status.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected: false,
            authenticated: false,
            auth_mode: None,
            client_id: client_id.into(),
            current_activity: None,
            reconnect_attempts: 0,
            last_heartbeat: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
