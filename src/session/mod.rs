//! Session engine.
//!
//! A [`Session`] drives one connection to the Discord client through its
//! lifecycle:
//!
//! ```text
//! connect() ──► handshake() ──► authenticate(token?) ──► set_activity(..)
//!     │              │                  │
//!     ▼              ▼                  ▼
//! Connected     Handshaking        Ready (Token | Authorized | Basic)
//! ```
//!
//! One engine task owns all session state. Handles send it messages;
//! notifications come back as [`SessionEvent`]s on a broadcast channel.
//!
//! # Reconnection
//!
//! With `auto_reconnect` on, an unexpected close schedules a retry after
//! `min(reconnect_delay * 2^(attempt - 1), 30s)`. The retry reconnects,
//! repeats the handshake, re-authenticates if the session was authenticated
//! and resubmits the last activity. Sends issued while disconnected are
//! queued and flushed in order after authentication.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Public [`Session`] handle |
//! | `builder` | [`SessionBuilder`] |
//! | `config` | [`SessionConfig`] and defaults |
//! | `engine` | Event loop owning session state |
//! | `correlator` | Nonce-keyed pending requests |
//! | `queue` | Outbound queue for disconnected sends |
//! | `backoff` | Reconnection delay |
//! | `state` | Lifecycle state and status snapshot |
//! | `event` | Notifications |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnection delay.
pub mod backoff;

/// Session builder.
pub mod builder;

/// Public session handle.
pub mod client;

/// Session configuration.
pub mod config;

/// Nonce-keyed pending requests.
pub mod correlator;

/// Engine event loop.
mod engine;

/// Session notifications.
pub mod event;

/// Outbound queue.
pub mod queue;

/// Lifecycle state and status snapshot.
pub mod state;

#[cfg(test)]
mod tests;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{MAX_RECONNECT_DELAY, reconnect_delay};
pub use builder::SessionBuilder;
pub use client::Session;
pub use config::SessionConfig;
pub use correlator::{MAX_PENDING_REQUESTS, RequestCorrelator};
pub use event::SessionEvent;
pub use queue::OutboundQueue;
pub use state::{AuthMode, ConnectionState, SessionStatus};
