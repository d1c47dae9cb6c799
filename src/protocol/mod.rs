//! Wire protocol types.
//!
//! This module defines the binary framing and the JSON payloads exchanged
//! with the Discord client over its local IPC endpoint.
//!
//! # Protocol Overview
//!
//! | Opcode | Direction | Payload |
//! |--------|-----------|---------|
//! | `Handshake` (0) | Local → Remote | `{v, client_id}` |
//! | `Frame` (1) | Both | Command / response / dispatch |
//! | `Close` (2) | Remote → Local | `{code, message}` |
//! | `Ping` (3) / `Pong` (4) | Both | Echoed payload |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | 8-byte header codec and streaming decoder |
//! | `message` | Handshake, command and inbound payloads |
//! | `activity` | Rich presence activity record |

// ============================================================================
// Submodules
// ============================================================================

/// Rich presence activity record.
pub mod activity;

/// Binary frame codec.
pub mod frame;

/// JSON payload types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use activity::{Activity, Assets, Button, Party, Timestamps};
pub use frame::{Frame, FrameDecoder, HEADER_SIZE, MAX_PAYLOAD_SIZE, Opcode, decode, encode};
pub use message::{Command, CommandFrame, Handshake, InboundMessage, PROTOCOL_VERSION};
