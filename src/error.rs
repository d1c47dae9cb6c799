//! Error types for the IPC session engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use discord_presence_ipc::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     session.connect().await?;
//!     session.handshake().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::ConnectionFailure`], [`Error::NotConnected`], [`Error::ConnectionClosed`], [`Error::SessionClosed`], [`Error::ReconnectExhausted`] |
//! | Commands | [`Error::CommandTimeout`], [`Error::RemoteError`], [`Error::TooManyPending`] |
//! | Protocol | [`Error::ProtocolDecode`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Constants
// ============================================================================

/// Remediation text attached to [`Error::ConnectionFailure`].
pub const CONNECTION_GUIDANCE: &str = "Make sure the Discord desktop client is running \
     and logged in, that it runs as the same user as this process, and that \
     no sandbox hides its IPC socket (Flatpak/Snap installs expose it under \
     a different runtime directory).";

// ============================================================================
// EndpointFailure
// ============================================================================

/// Why a single candidate endpoint refused the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    /// The endpoint that was tried.
    pub address: String,
    /// Human-readable failure reason.
    pub reason: String,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.reason)
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No candidate endpoint accepted a connection.
    ///
    /// Carries one entry per endpoint tried, plus remediation guidance.
    #[error("Could not connect to the Discord client ({} endpoints tried)", .failures.len())]
    ConnectionFailure {
        /// Per-endpoint failures, in the order they were tried.
        failures: Vec<EndpointFailure>,
        /// Remediation hint for humans.
        guidance: &'static str,
    },

    /// Send attempted while disconnected with auto-reconnect disabled.
    #[error("Not connected")]
    NotConnected,

    /// The connection closed while a request was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session engine has shut down.
    #[error("Session closed")]
    SessionClosed,

    /// Automatic reconnection gave up.
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// No correlated response arrived in time.
    #[error("Command {command} timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command that timed out.
        command: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The remote reported an error.
    #[error("Remote error: {message}")]
    RemoteError {
        /// Remote error code, when present.
        code: Option<i64>,
        /// Remote error message.
        message: String,
    },

    /// Too many correlated requests are outstanding.
    #[error("Too many pending requests (limit {limit})")]
    TooManyPending {
        /// Maximum outstanding requests.
        limit: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Inbound frame could not be decoded.
    ///
    /// The offending frame is dropped; the stream continues.
    #[error("Protocol decode error: {message}")]
    ProtocolDecode {
        /// Description of the decode failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection failure from per-endpoint failures.
    #[inline]
    pub fn connection_failure(failures: Vec<EndpointFailure>) -> Self {
        Self::ConnectionFailure {
            failures,
            guidance: CONNECTION_GUIDANCE,
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            command: command.into(),
            timeout_ms,
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::RemoteError {
            code,
            message: message.into(),
        }
    }

    /// Creates a protocol decode error.
    #[inline]
    pub fn protocol_decode(message: impl Into<String>) -> Self {
        Self::ProtocolDecode {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::SessionClosed
                | Self::ReconnectExhausted { .. }
                | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. }
                | Self::ConnectionClosed
                | Self::CommandTimeout { .. }
                | Self::TooManyPending { .. }
        )
    }

    /// Returns the remediation hint, if this error carries one.
    #[inline]
    #[must_use]
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailure { guidance, .. } => Some(*guidance),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
