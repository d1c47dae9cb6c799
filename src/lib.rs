//! Discord rich presence IPC - session engine for the local Discord client.
//!
//! This library talks to a running Discord desktop client over its local
//! IPC endpoint (a Unix socket or a Windows named pipe) to publish rich
//! presence and issue RPC commands.
//!
//! # Architecture
//!
//! - **Transport**: finds one of ten well-known endpoints and relays bytes
//! - **Protocol**: 8-byte little-endian header plus a JSON payload per frame
//! - **Session**: one engine task owning connection, pending requests,
//!   outbound queue and reconnection
//!
//! Key design principles:
//!
//! - Every [`Session`] clone talks to one engine task; no shared locks on the
//!   hot path
//! - Responses are matched to requests by nonce; each request settles once
//! - Notifications are typed [`SessionEvent`]s on a broadcast channel
//! - Log records go to an injected `tracing` dispatcher when one is given
//!
//! # Quick Start
//!
//! ```no_run
//! use discord_presence_ipc::{Activity, Result, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::builder("1234567890").build()?;
//!
//!     session.connect().await?;
//!     session.handshake().await?;
//!     session.authenticate(None).await?;
//!
//!     session
//!         .set_activity(Activity::named("Reviewing").with_state("PR #42"))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`Session`], [`SessionBuilder`], [`SessionEvent`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request nonces |
//! | [`protocol`] | Frame codec and JSON payloads |
//! | [`transport`] | Endpoint discovery and byte transport |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol types.
///
/// Frame codec, handshake, command and inbound message payloads.
pub mod protocol;

/// Session engine and its public handle.
pub mod session;

/// Local IPC transport layer.
///
/// Endpoint discovery, dialing and the connected byte stream.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::Nonce;

// Protocol types
pub use protocol::{
    Activity, Assets, Button, Command, Frame, FrameDecoder, Opcode, Party, Timestamps,
};

// Session types
pub use session::{
    AuthMode, ConnectionState, Session, SessionBuilder, SessionConfig, SessionEvent, SessionStatus,
};

// Transport types
pub use transport::{Dialer, IpcAddress, IpcStream, LocalDialer};
