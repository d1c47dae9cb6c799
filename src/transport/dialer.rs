//! Endpoint dialing.
//!
//! [`Dialer`] turns one address into a byte stream; [`connect_first`] walks
//! the candidate list in order and stops at the first success. Tests swap in
//! a dialer that hands out in-memory streams.

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{EndpointFailure, Error, Result};

use super::address::IpcAddress;

// ============================================================================
// Types
// ============================================================================

/// A bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed stream produced by a [`Dialer`].
pub type IpcStream = Box<dyn AsyncStream>;

// ============================================================================
// Dialer
// ============================================================================

/// Opens a stream to a single endpoint.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connects to `address`.
    async fn dial(&self, address: &IpcAddress) -> io::Result<IpcStream>;
}

/// Dials real local endpoints (Unix sockets or Windows named pipes).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDialer;

#[async_trait]
impl Dialer for LocalDialer {
    async fn dial(&self, address: &IpcAddress) -> io::Result<IpcStream> {
        #[cfg(unix)]
        {
            let stream = tokio::net::UnixStream::connect(address.path()).await?;
            Ok(Box::new(stream))
        }

        #[cfg(windows)]
        {
            let client =
                tokio::net::windows::named_pipe::ClientOptions::new().open(address.path())?;
            Ok(Box::new(client))
        }

        #[cfg(not(any(unix, windows)))]
        {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no local IPC transport for {address} on this platform"),
            ))
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Tries each candidate in order; the first successful dial wins.
///
/// Each attempt is bounded by `attempt_timeout`.
///
/// # Errors
///
/// Returns [`Error::ConnectionFailure`] listing every failed candidate.
pub async fn connect_first(
    dialer: &dyn Dialer,
    candidates: &[IpcAddress],
    attempt_timeout: Duration,
) -> Result<(IpcAddress, IpcStream)> {
    let mut failures = Vec::with_capacity(candidates.len());

    for address in candidates {
        let reason = match timeout(attempt_timeout, dialer.dial(address)).await {
            Ok(Ok(stream)) => {
                debug!(%address, "Connected to IPC endpoint");
                return Ok((address.clone(), stream));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", attempt_timeout.as_millis()),
        };

        trace!(%address, %reason, "IPC endpoint unavailable");
        failures.push(EndpointFailure {
            address: address.to_string(),
            reason,
        });
    }

    Err(Error::connection_failure(failures))
}

// ============================================================================
// Tests
// ============================================================================
