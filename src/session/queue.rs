//! Outbound queue for sends issued while disconnected.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::Opcode;
use crate::transport::FrameSink;

// ============================================================================
// QueuedMessage
// ============================================================================

/// A frame waiting for the connection to come back.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Frame opcode.
    pub opcode: Opcode,
    /// Frame payload.
    pub data: Value,
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// FIFO of frames deferred until authentication completes.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame to the tail.
    #[inline]
    pub fn push(&mut self, opcode: Opcode, data: Value) {
        self.messages.push_back(QueuedMessage { opcode, data });
    }

    /// Returns the number of queued frames.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every queued frame. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        count
    }

    /// Writes queued frames to `sink` in FIFO order.
    ///
    /// A frame leaves the queue only after it was written, so a failure
    /// leaves it and everything behind it for the next flush.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub async fn flush<S>(&mut self, sink: &mut S) -> Result<usize>
    where
        S: FrameSink + ?Sized,
    {
        let mut sent = 0;
        while let Some(message) = self.messages.front() {
            sink.send_frame(message.opcode, &message.data).await?;
            self.messages.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}

// ============================================================================
// Tests
// ============================================================================
