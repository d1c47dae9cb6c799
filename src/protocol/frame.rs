//! Binary frame codec.
//!
//! Every message on the wire is a fixed 8-byte header followed by a UTF-8
//! JSON payload:
//!
//! ```text
//! ┌──────────────────┬──────────────────┬─────────────────────────┐
//! │ opcode (u32 LE)  │ length (u32 LE)  │ JSON payload (length B) │
//! └──────────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! [`encode`] builds one frame. [`FrameDecoder`] accumulates inbound chunks
//! and yields complete frames regardless of where chunk boundaries fall.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload the decoder accepts (64 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

// ============================================================================
// Opcode
// ============================================================================

/// Frame opcodes understood by the Discord client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// First frame after connecting: `{v, client_id}`.
    Handshake = 0,
    /// Command or response/dispatch frame.
    Frame = 1,
    /// Remote is closing the connection: `{code, message}`.
    Close = 2,
    /// Liveness probe; answered with [`Opcode::Pong`].
    Ping = 3,
    /// Liveness reply.
    Pong = 4,
}

impl Opcode {
    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Maps a wire value to an opcode.
    #[inline]
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One decoded frame.
///
/// The opcode is kept raw; [`Frame::kind`] classifies it. The header's
/// length field is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode from the header.
    pub opcode: u32,
    /// Payload bytes (UTF-8 JSON).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame from raw parts.
    #[inline]
    #[must_use]
    pub fn new(opcode: u32, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Returns the classified opcode, if known.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> Option<Opcode> {
        Opcode::from_u32(self.opcode)
    }

    /// Returns the payload length as written in the header.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Parses the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolDecode`] if the payload is not valid JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            Error::protocol_decode(format!(
                "invalid JSON in opcode {} frame: {e}",
                self.opcode
            ))
        })
    }

    /// Serializes the frame (header + payload).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes `data` as JSON inside a frame with the given opcode.
///
/// # Errors
///
/// Returns [`Error::Json`] if `data` cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(opcode: Opcode, data: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(data)?;
    Ok(Frame::new(opcode.as_u32(), payload).to_bytes())
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the header or payload is still incomplete; the
/// caller keeps `buf` untouched and retries once more bytes arrive. On
/// success returns the frame and the number of bytes it occupied.
///
/// # Errors
///
/// Returns [`Error::ProtocolDecode`] if the header announces a payload
/// larger than [`MAX_PAYLOAD_SIZE`].
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    let Some(header) = buf.get(..HEADER_SIZE) else {
        return Ok(None);
    };

    let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if length > MAX_PAYLOAD_SIZE {
        return Err(Error::protocol_decode(format!(
            "payload size {length} exceeds maximum {MAX_PAYLOAD_SIZE}"
        )));
    }

    let end = HEADER_SIZE + length as usize;
    let Some(payload) = buf.get(HEADER_SIZE..end) else {
        return Ok(None);
    };

    Ok(Some((Frame::new(opcode, payload.to_vec()), end)))
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// Streaming decoder over an accumulating byte buffer.
///
/// Feed chunks with [`push`](Self::push), then drain frames with
/// [`next_frame`](Self::next_frame) until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes received but not yet consumed by a complete frame.
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an inbound chunk.
    #[inline]
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete frame, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolDecode`] on an oversized header. The buffer
    /// is discarded because the stream can no longer be resynchronized.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match decode(&self.buffer) {
            Ok(Some((frame, consumed))) => {
                self.buffer.drain(..consumed);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    /// Returns the number of buffered bytes.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any partial frame.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
