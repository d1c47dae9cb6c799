//! Local IPC transport layer.
//!
//! This module finds the Discord client's IPC endpoint and relays raw bytes
//! to and from it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session (Rust) │     Unix socket / pipe       │  Discord client │
//! │                 │◄────────────────────────────►│                 │
//! │  Transport      │   {runtime}/discord-ipc-N    │  RPC server     │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `candidate_addresses` - Ordered list of ten well-known endpoints
//! 2. `connect_first` - Dial each in turn, first success wins
//! 3. `Transport::spawn` - Reader task forwards bytes as events
//! 4. `Transport::close` - Idempotent shutdown
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `address` | Endpoint naming and resolution |
//! | `dialer` | Dialing seam and sequential connector |
//! | `connection` | Connected stream and reader task |

// ============================================================================
// Submodules
// ============================================================================

/// Endpoint naming and resolution.
pub mod address;

/// Connected stream and reader task.
pub mod connection;

/// Dialing seam and sequential connector.
pub mod dialer;

// ============================================================================
// Re-exports
// ============================================================================

pub use address::{IpcAddress, candidate_addresses, candidate_addresses_with};
pub use connection::{FrameSink, Transport, TransportEvent, TransportEventSender};
pub use dialer::{AsyncStream, Dialer, IpcStream, LocalDialer, connect_first};
