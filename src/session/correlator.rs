//! Request/response correlation.
//!
//! Each correlated command gets a fresh [`Nonce`]. The pending entry holds
//! the caller's reply channel and the handle of its timeout timer; exactly
//! one of response, timeout or rejection consumes it.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::Nonce;
use crate::protocol::{Command, InboundMessage};

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending requests before rejecting new ones.
pub const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Caller side of a correlated request.
pub type ReplySender = oneshot::Sender<Result<Value>>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Command that was sent.
    pub command: Command,
    /// Timeout the timer was armed with.
    pub timeout: Duration,
    /// Where the outcome goes.
    pub reply: ReplySender,
    /// Timeout timer.
    pub timer: JoinHandle<()>,
}

// ============================================================================
// RequestCorrelator
// ============================================================================

/// Pending-request table keyed by nonce.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: FxHashMap<Nonce, PendingRequest>,
}

impl RequestCorrelator {
    /// Creates an empty correlator.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `true` if `nonce` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, nonce: &Nonce) -> bool {
        self.pending.contains_key(nonce)
    }

    /// Returns a nonce not currently pending.
    #[must_use]
    pub fn next_nonce(&self) -> Nonce {
        loop {
            let nonce = Nonce::generate();
            if !self.pending.contains_key(&nonce) {
                return nonce;
            }
        }
    }

    /// Fails if the table is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyPending`] at [`MAX_PENDING_REQUESTS`].
    pub fn check_capacity(&self) -> Result<()> {
        if self.pending.len() >= MAX_PENDING_REQUESTS {
            warn!(
                pending = self.pending.len(),
                max = MAX_PENDING_REQUESTS,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                limit: MAX_PENDING_REQUESTS,
            });
        }
        Ok(())
    }

    /// Registers a request under a nonce from [`next_nonce`](Self::next_nonce).
    pub fn register(&mut self, nonce: Nonce, request: PendingRequest) {
        trace!(%nonce, command = %request.command, "Request registered");
        if let Some(previous) = self.pending.insert(nonce, request) {
            previous.timer.abort();
            let _ = previous.reply.send(Err(Error::ConnectionClosed));
        }
    }

    /// Routes an inbound message to its pending request.
    ///
    /// Returns the message back if no request matches, including a second
    /// response for a nonce that was already resolved.
    pub fn resolve(&mut self, message: InboundMessage) -> Option<InboundMessage> {
        let Some(nonce) = message.nonce() else {
            return Some(message);
        };
        let Some(request) = self.pending.remove(&nonce) else {
            return Some(message);
        };

        request.timer.abort();
        trace!(%nonce, command = %request.command, "Response matched");
        let _ = request.reply.send(message.into_result());
        None
    }

    /// Rejects one request with `err`.
    ///
    /// Returns `false` if it was no longer pending.
    pub fn fail(&mut self, nonce: &Nonce, err: Error) -> bool {
        match self.pending.remove(nonce) {
            Some(request) => {
                request.timer.abort();
                let _ = request.reply.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Rejects one request with a timeout naming its command.
    ///
    /// Returns `false` if it was already resolved.
    pub fn expire(&mut self, nonce: &Nonce) -> bool {
        match self.pending.remove(nonce) {
            Some(request) => {
                let timeout_ms = request.timeout.as_millis() as u64;
                warn!(%nonce, command = %request.command, timeout_ms, "Command timed out");
                let _ = request
                    .reply
                    .send(Err(Error::command_timeout(request.command.as_str(), timeout_ms)));
                true
            }
            None => false,
        }
    }

    /// Rejects every pending request. Returns how many there were.
    pub fn reject_all<F>(&mut self, make_err: F) -> usize
    where
        F: Fn() -> Error,
    {
        let pending: Vec<_> = self.pending.drain().collect();
        let count = pending.len();

        for (_, request) in pending {
            request.timer.abort();
            let _ = request.reply.send(Err(make_err()));
        }

        if count > 0 {
            debug!(count, "Rejected pending requests");
        }
        count
    }
}

// ============================================================================
// Tests
// ============================================================================
