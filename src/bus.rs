//! The page-wide broadcast bus between the page provider and the bridge.
//!
//! The page script and the bridge share the tab's DOM but no variables; the
//! only channel between them is a broadcast primitive (window messaging in the
//! browser). Every participant sees every message, in posting order. The
//! relay relies on message kinds being disjoint per direction, so a
//! participant simply ignores kinds not addressed to it, including the ones it
//! posted itself.
//!
//! [`LocalBus`] is an in-process implementation with the same semantics:
//! delivery is asynchronous with respect to `post` (messages are queued and
//! delivered by [`LocalBus::deliver_all`]) and FIFO.

use crate::messages::RelayMessage;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::rc::Rc;

/// Error type for bus operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The message could not be encoded for the bus.
    #[error("cannot encode message: {0}")]
    Encode(#[from] crate::messages::Error),
    /// The host refused to post the message.
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// A broadcast channel carrying [`RelayMessage`]s.
pub trait BroadcastBus: Debug {
    /// Posts `message` to every participant, including the sender.
    fn post(&self, message: &RelayMessage) -> Result<(), Error>;

    /// Adds a participant. Listeners are never called from inside `post`.
    fn subscribe(&self, listener: Listener);
}

/// Callback receiving bus messages.
pub type Listener = Rc<dyn Fn(&RelayMessage)>;

#[derive(Default)]
struct LocalBusInner {
    queue: VecDeque<RelayMessage>,
    listeners: Vec<Listener>,
    posted: usize,
}

/// An in-process FIFO broadcast bus. Clones share the same bus.
///
/// # Examples
///
/// ```
/// use wallet_relay::bus::{BroadcastBus, LocalBus};
/// use wallet_relay::messages::RelayMessage;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let bus = LocalBus::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let sink = seen.clone();
/// bus.subscribe(Rc::new(move |m: &RelayMessage| sink.borrow_mut().push(m.kind())));
///
/// bus.post(&RelayMessage::Ready).unwrap();
/// assert!(seen.borrow().is_empty());
/// bus.deliver_all();
/// assert_eq!(*seen.borrow(), vec!["ready"]);
/// ```
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Rc<RefCell<LocalBusInner>>,
}

impl Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("LocalBus")
            .field("queued", &inner.queue.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl LocalBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one queued message to every participant.
    ///
    /// Returns `false` if nothing was queued.
    pub fn deliver_one(&self) -> bool {
        let (message, listeners) = {
            let mut inner = self.inner.borrow_mut();
            match inner.queue.pop_front() {
                Some(message) => (message, inner.listeners.clone()),
                None => return false,
            }
        };
        for listener in listeners {
            listener(&message);
        }
        true
    }

    /// Delivers queued messages until the queue is empty, including messages
    /// posted during delivery. Returns how many were delivered.
    pub fn deliver_all(&self) -> usize {
        let mut delivered = 0;
        while self.deliver_one() {
            delivered += 1;
        }
        delivered
    }

    /// Number of messages awaiting delivery.
    pub fn queued(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Total number of messages ever posted.
    pub fn posted(&self) -> usize {
        self.inner.borrow().posted
    }
}

impl BroadcastBus for LocalBus {
    fn post(&self, message: &RelayMessage) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.queue.push_back(message.clone());
        inner.posted += 1;
        Ok(())
    }

    fn subscribe(&self, listener: Listener) {
        self.inner.borrow_mut().listeners.push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_posted_during_delivery_are_delivered_after() {
        let bus = LocalBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let echo_bus = bus.clone();
        bus.subscribe(Rc::new(move |m: &RelayMessage| {
            if *m == RelayMessage::Ready {
                echo_bus.post(&RelayMessage::AdoptAlternative).unwrap();
            }
        }));
        let sink = seen.clone();
        bus.subscribe(Rc::new(move |m: &RelayMessage| sink.borrow_mut().push(m.kind())));

        bus.post(&RelayMessage::Ready).unwrap();
        bus.post(&RelayMessage::Resize { size: crate::bridge::visual::SurfaceSize::Compact }).unwrap();
        assert_eq!(bus.deliver_all(), 3);
        assert_eq!(*seen.borrow(), vec!["ready", "resize", "adopt_alternative"]);
        assert_eq!(bus.posted(), 3);
        assert_eq!(bus.queued(), 0);
    }
}
