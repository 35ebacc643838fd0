//! Buffering of page traffic until the embedded surface is ready.
//!
//! The embedded surface loads asynchronously, but a dApp may call `request()`
//! the instant the page provider appears. Every message destined for the
//! surface is queued here until the surface reports `ready`; the queue is then
//! drained once, in arrival order, and the bridge switches to sending directly.

use crate::messages::RelayMessage;
use std::collections::VecDeque;

/// Ordered queue of messages held back until the surface is ready.
///
/// # Examples
///
/// ```
/// use wallet_relay::bridge::buffer::{Admission, MessageBuffer};
/// use wallet_relay::messages::RelayMessage;
///
/// let mut buffer = MessageBuffer::new();
/// assert_eq!(buffer.admit(RelayMessage::AdoptAlternative), Admission::Buffered);
///
/// let flushed = buffer.open();
/// assert_eq!(flushed, vec![RelayMessage::AdoptAlternative]);
/// assert!(buffer.is_open());
/// assert!(matches!(buffer.admit(RelayMessage::Ready), Admission::Send(_)));
/// ```
#[derive(Debug, Default)]
pub struct MessageBuffer {
    queue: VecDeque<RelayMessage>,
    open: bool,
}

/// What the caller must do with an admitted message.
#[derive(Debug, PartialEq)]
pub enum Admission {
    /// The message was queued
    Buffered,
    /// The buffer is open; send the message now
    Send(RelayMessage),
}

impl MessageBuffer {
    /// A closed, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `message` while closed, or hands it back for sending once open.
    pub fn admit(&mut self, message: RelayMessage) -> Admission {
        if self.open {
            Admission::Send(message)
        } else {
            self.queue.push_back(message);
            Admission::Buffered
        }
    }

    /// Opens the buffer, returning everything queued in arrival order.
    ///
    /// Opening an already open buffer returns nothing.
    pub fn open(&mut self) -> Vec<RelayMessage> {
        self.open = true;
        self.queue.drain(..).collect()
    }

    /// Closes the buffer and discards anything queued.
    pub fn close(&mut self) {
        self.open = false;
        self.queue.clear();
    }

    /// Whether messages are sent directly.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
