//! JSON payloads carried inside frames.
//!
//! # Format
//!
//! Handshake (opcode 0):
//! ```json
//! { "v": 1, "client_id": "1234567890" }
//! ```
//!
//! Outbound command (opcode 1):
//! ```json
//! { "cmd": "SET_ACTIVITY", "nonce": "uuid", "args": { ... } }
//! ```
//!
//! Inbound response or dispatch (opcode 1):
//! ```json
//! { "cmd": "DISPATCH", "evt": "READY", "nonce": null, "data": { ... } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::identifiers::Nonce;

// ============================================================================
// Constants
// ============================================================================

/// RPC protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Inbound `cmd` value for unsolicited events.
pub const DISPATCH: &str = "DISPATCH";

/// Event name announcing the session is ready.
pub const EVENT_READY: &str = "READY";

/// Event name carrying a remote error.
pub const EVENT_ERROR: &str = "ERROR";

// ============================================================================
// Command
// ============================================================================

/// RPC commands the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Request an OAuth2 authorization code (may prompt the user).
    Authorize,
    /// Authenticate with an existing access token.
    Authenticate,
    /// Publish or clear the rich presence activity.
    SetActivity,
    /// Subscribe to a dispatch event.
    Subscribe,
    /// Unsubscribe from a dispatch event.
    Unsubscribe,
    /// Fetch a user.
    GetUser,
    /// Fetch the user's guilds.
    GetGuilds,
    /// Fetch a guild's channels.
    GetChannels,
}

impl Command {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "AUTHORIZE",
            Self::Authenticate => "AUTHENTICATE",
            Self::SetActivity => "SET_ACTIVITY",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::GetUser => "GET_USER",
            Self::GetGuilds => "GET_GUILDS",
            Self::GetChannels => "GET_CHANNELS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handshake<'a> {
    /// Protocol version.
    pub v: u32,
    /// Application client ID.
    pub client_id: &'a str,
}

impl<'a> Handshake<'a> {
    /// Creates a handshake for the current protocol version.
    #[inline]
    #[must_use]
    pub const fn new(client_id: &'a str) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            client_id,
        }
    }
}

// ============================================================================
// CommandFrame
// ============================================================================

/// Outbound command payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFrame {
    /// Command name.
    pub cmd: Command,
    /// Correlation nonce.
    pub nonce: Nonce,
    /// Command arguments.
    pub args: Value,
    /// Event name, for `SUBSCRIBE`/`UNSUBSCRIBE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
}

impl CommandFrame {
    /// Creates a command frame correlated by `nonce`.
    #[inline]
    #[must_use]
    pub fn new(cmd: Command, nonce: Nonce, args: Value) -> Self {
        Self {
            cmd,
            nonce,
            args,
            evt: None,
        }
    }

    /// Sets the event name, for `SUBSCRIBE`/`UNSUBSCRIBE`.
    #[inline]
    #[must_use]
    pub fn with_event(mut self, evt: Option<String>) -> Self {
        self.evt = evt;
        self
    }
}

// ============================================================================
// InboundMessage
// ============================================================================

/// Inbound opcode-1 payload.
///
/// Responses echo the outbound `cmd` and `nonce`; dispatches use
/// `cmd: "DISPATCH"` with an `evt` name and no nonce.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundMessage {
    /// Command name.
    #[serde(default)]
    pub cmd: Option<String>,
    /// Event name.
    #[serde(default)]
    pub evt: Option<String>,
    /// Correlation nonce, when this answers a command.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
}

impl InboundMessage {
    /// Parses the nonce, if present and well-formed.
    #[inline]
    #[must_use]
    pub fn nonce(&self) -> Option<Nonce> {
        self.nonce.as_deref().and_then(|n| n.parse().ok())
    }

    /// Returns `true` if this is a `DISPATCH` frame.
    #[inline]
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        self.cmd.as_deref() == Some(DISPATCH)
    }

    /// Returns `true` if the payload reports an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.evt.as_deref() == Some(EVENT_ERROR)
    }

    /// Builds a [`Error::RemoteError`] from `data.code` and `data.message`.
    #[must_use]
    pub fn remote_error(&self) -> Error {
        let code = self.data.get("code").and_then(Value::as_i64);
        let message = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown remote error");
        Error::remote(code, message)
    }

    /// Consumes the message, yielding its result or its remote error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteError`] if the message is an `ERROR` event.
    pub fn into_result(self) -> Result<Value, Error> {
        if self.is_error() {
            Err(self.remote_error())
        } else {
            Ok(self.data)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
