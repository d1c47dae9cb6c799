//! Live IPC connection.
//!
//! This module owns one connected byte stream. Writes go straight to the
//! write half; a spawned reader task forwards inbound chunks to the session
//! as [`TransportEvent`]s tagged with the connection's id, so events from a
//! stale connection can be told apart after a reconnect.
//!
//! # Reader Task
//!
//! The reader emits, in order:
//!
//! - `Data(chunk)` for every non-empty read
//! - `Error(err)` if a read fails
//! - `Closed` exactly once, when the stream ends or fails

// ============================================================================
// Imports
// ============================================================================

use std::io;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Opcode, encode};

use super::address::IpcAddress;
use super::dialer::IpcStream;

// ============================================================================
// Constants
// ============================================================================

/// Read buffer size for the reader task.
const READ_BUFFER_SIZE: usize = 16 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Something raised by a connection's reader task.
#[derive(Debug)]
pub enum TransportEvent {
    /// Bytes received.
    Data(Vec<u8>),
    /// A read failed; `Closed` follows.
    Error(io::Error),
    /// The stream ended.
    Closed,
}

/// Channel carrying `(connection id, event)` pairs.
pub type TransportEventSender = mpsc::UnboundedSender<(u64, TransportEvent)>;

// ============================================================================
// FrameSink
// ============================================================================

/// Destination for encoded frames.
#[async_trait]
pub trait FrameSink: Send {
    /// Encodes and writes one frame.
    async fn send_frame(&mut self, opcode: Opcode, data: &Value) -> Result<()>;
}

// ============================================================================
// Transport
// ============================================================================

/// One connected IPC stream.
pub struct Transport {
    /// Connection id, unique per session.
    id: u64,
    /// Endpoint this stream is connected to.
    address: IpcAddress,
    /// Write half; `None` once closed.
    writer: Option<WriteHalf<IpcStream>>,
    /// Reader task handle; `None` once closed.
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Takes ownership of `stream` and spawns its reader task.
    ///
    /// The reader logs to the dispatcher that is current at this call.
    pub fn spawn(
        id: u64,
        address: IpcAddress,
        stream: IpcStream,
        events: TransportEventSender,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader =
            tokio::spawn(Self::run_reader(id, read_half, events).with_current_subscriber());

        Self {
            id,
            address,
            writer: Some(write_half),
            reader: Some(reader),
        }
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the connected endpoint.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &IpcAddress {
        &self.address
    }

    /// Returns `true` until [`close`](Self::close) is called.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Writes raw bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the transport is closed
    /// - [`Error::Io`] if the write fails
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        trace!(id = self.id, len = bytes.len(), "Bytes written");
        Ok(())
    }

    /// Closes the stream. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take()
            && let Err(e) = writer.shutdown().await
        {
            debug!(id = self.id, error = %e, "Shutdown failed");
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
            debug!(id = self.id, address = %self.address, "Transport closed");
        }
    }

    /// Reader loop.
    async fn run_reader(
        id: u64,
        mut read_half: ReadHalf<IpcStream>,
        events: TransportEventSender,
    ) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    debug!(id, "IPC stream ended");
                    break;
                }

                Ok(n) => {
                    if events.send((id, TransportEvent::Data(buf[..n].to_vec()))).is_err() {
                        return;
                    }
                }

                Err(e) => {
                    warn!(id, error = %e, "IPC read failed");
                    let _ = events.send((id, TransportEvent::Error(e)));
                    break;
                }
            }
        }

        let _ = events.send((id, TransportEvent::Closed));
    }
}

#[async_trait]
impl FrameSink for Transport {
    async fn send_frame(&mut self, opcode: Opcode, data: &Value) -> Result<()> {
        let bytes = encode(opcode, data)?;
        self.send(&bytes).await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
