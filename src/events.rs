//! The provider event surface and its subscription registry.
//!
//! dApps subscribe with `on(event, handler)` to the EIP-1193 events `connect`,
//! `disconnect`, `accountsChanged`, `chainChanged` and `message`. The page may
//! be answered by either of two provider objects over its lifetime (this
//! wallet's own, or a competing one the user chose), and when the answering
//! provider changes the dApp's existing subscriptions must follow it without
//! the dApp re-registering anything.
//!
//! Subscriptions therefore live in one [`SubscriptionRegistry`] that is
//! *bound* to one emitter at a time. Both providers emit into the registry,
//! tagged with their [`EmitterId`]; only emissions from the bound emitter reach
//! subscribers. Moving every subscription to the other provider is a single
//! [`rebind`](SubscriptionRegistry::rebind).
//!
//! # Examples
//!
//! ```
//! use wallet_relay::events::{EmitterId, EventName, ProviderEvent, SubscriptionRegistry};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let registry = SubscriptionRegistry::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! registry.on(EventName::ChainChanged, Rc::new(move |e: &ProviderEvent| {
//!     sink.borrow_mut().push(e.payload());
//! }));
//!
//! registry.emit_from(EmitterId::Own, &ProviderEvent::ChainChanged("0x1".into()));
//! // the competitor is not bound, so its emissions are not observed
//! registry.emit_from(EmitterId::Alternative, &ProviderEvent::ChainChanged("0x89".into()));
//! registry.rebind(EmitterId::Alternative);
//! registry.emit_from(EmitterId::Alternative, &ProviderEvent::ChainChanged("0xa".into()));
//!
//! assert_eq!(*seen.borrow(), vec![serde_json::json!("0x1"), serde_json::json!("0xa")]);
//! ```

use crate::jrpc::ProviderRpcError;
use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;
use std::str::FromStr;

/// The names of the provider events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `accountsChanged`
    AccountsChanged,
    /// `chainChanged`
    ChainChanged,
    /// `message`
    Message,
}

impl EventName {
    /// The name dApps subscribe with.
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Connect => "connect",
            EventName::Disconnect => "disconnect",
            EventName::AccountsChanged => "accountsChanged",
            EventName::ChainChanged => "chainChanged",
            EventName::Message => "message",
        }
    }
}

impl Display for EventName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event name no provider emits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider event {0:?}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventName {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(EventName::Connect),
            "disconnect" => Ok(EventName::Disconnect),
            "accountsChanged" => Ok(EventName::AccountsChanged),
            "chainChanged" => Ok(EventName::ChainChanged),
            "message" => Ok(EventName::Message),
            other => Err(UnknownEvent(other.to_owned())),
        }
    }
}

/// An emitted provider event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The provider connected to `chain_id`
    Connect {
        /// Hex chain id
        chain_id: String,
    },
    /// The provider disconnected
    Disconnect(ProviderRpcError),
    /// The exposed accounts changed; empty when locked or disconnected
    AccountsChanged(Vec<String>),
    /// The chain changed
    ChainChanged(String),
    /// A provider message, e.g. a subscription notification
    Message {
        /// Message type
        kind: String,
        /// Message data
        data: serde_json::Value,
    },
}

impl ProviderEvent {
    /// The event's name.
    pub fn name(&self) -> EventName {
        match self {
            ProviderEvent::Connect { .. } => EventName::Connect,
            ProviderEvent::Disconnect(_) => EventName::Disconnect,
            ProviderEvent::AccountsChanged(_) => EventName::AccountsChanged,
            ProviderEvent::ChainChanged(_) => EventName::ChainChanged,
            ProviderEvent::Message { .. } => EventName::Message,
        }
    }

    /// The argument handed to page listeners, shaped per EIP-1193.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            ProviderEvent::Connect { chain_id } => serde_json::json!({ "chainId": chain_id }),
            ProviderEvent::Disconnect(error) => {
                serde_json::to_value(error).unwrap_or(serde_json::Value::Null)
            }
            ProviderEvent::AccountsChanged(accounts) => serde_json::json!(accounts),
            ProviderEvent::ChainChanged(chain_id) => serde_json::json!(chain_id),
            ProviderEvent::Message { kind, data } => {
                serde_json::json!({ "type": kind, "data": data })
            }
        }
    }
}

/// Which provider object an emission comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterId {
    /// This wallet's provider
    Own,
    /// The competing provider captured at injection time
    Alternative,
}

/// Identifies one subscription for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A subscriber callback.
pub type Handler = Rc<dyn Fn(&ProviderEvent)>;

/// A callback through which a provider emits into the registry.
pub type EventSink = Rc<dyn Fn(ProviderEvent)>;

struct Subscription {
    id: SubscriptionId,
    event: EventName,
    handler: Handler,
}

struct RegistryInner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
    bound: EmitterId,
}

/// Page subscriptions, bound to one emitter at a time.
pub struct SubscriptionRegistry {
    inner: RefCell<RegistryInner>,
}

impl Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &inner.subscriptions.len())
            .field("bound", &inner.bound)
            .finish()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// An empty registry bound to [`EmitterId::Own`].
    pub fn new() -> Self {
        SubscriptionRegistry {
            inner: RefCell::new(RegistryInner {
                next_id: 0,
                subscriptions: Vec::new(),
                bound: EmitterId::Own,
            }),
        }
    }

    /// Subscribes `handler` to `event`.
    pub fn on(&self, event: EventName, handler: Handler) -> SubscriptionId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscriptions.push(Subscription { id, event, handler });
        id
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        inner.subscriptions.len() != before
    }

    /// Number of subscriptions to `event`.
    pub fn listener_count(&self, event: EventName) -> usize {
        self.inner
            .borrow()
            .subscriptions
            .iter()
            .filter(|s| s.event == event)
            .count()
    }

    /// The emitter subscribers currently hear.
    pub fn bound(&self) -> EmitterId {
        self.inner.borrow().bound
    }

    /// Moves every subscription to `emitter`; returns the previous binding.
    pub fn rebind(&self, emitter: EmitterId) -> EmitterId {
        std::mem::replace(&mut self.inner.borrow_mut().bound, emitter)
    }

    /// Delivers `event` from `source` to its subscribers, in subscription order.
    ///
    /// Emissions from an emitter that is not bound are dropped. Returns how many
    /// handlers ran. Handlers may subscribe, unsubscribe or emit re-entrantly;
    /// such changes apply from the next emission.
    pub fn emit_from(&self, source: EmitterId, event: &ProviderEvent) -> usize {
        let handlers: Vec<Handler> = {
            let inner = self.inner.borrow();
            if inner.bound != source {
                return 0;
            }
            inner
                .subscriptions
                .iter()
                .filter(|s| s.event == event.name())
                .map(|s| s.handler.clone())
                .collect()
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// A sink that emits into this registry as `source`.
    pub fn sink(self: &Rc<Self>, source: EmitterId) -> EventSink {
        let registry = Rc::downgrade(self);
        Rc::new(move |event: ProviderEvent| {
            if let Some(registry) = registry.upgrade() {
                registry.emit_from(source, &event);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter(registry: &SubscriptionRegistry, event: EventName) -> (Rc<Cell<usize>>, SubscriptionId) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let id = registry.on(event, Rc::new(move |_: &ProviderEvent| c.set(c.get() + 1)));
        (count, id)
    }

    #[test]
    fn names_round_trip() {
        for name in [
            EventName::Connect,
            EventName::Disconnect,
            EventName::AccountsChanged,
            EventName::ChainChanged,
            EventName::Message,
        ] {
            assert_eq!(name.as_str().parse::<EventName>(), Ok(name));
        }
        assert!("accountschanged".parse::<EventName>().is_err());
    }

    #[test]
    fn only_matching_event_handlers_run() {
        let registry = SubscriptionRegistry::new();
        let (accounts, _) = counter(&registry, EventName::AccountsChanged);
        let (chain, _) = counter(&registry, EventName::ChainChanged);
        registry.emit_from(EmitterId::Own, &ProviderEvent::AccountsChanged(vec![]));
        assert_eq!(accounts.get(), 1);
        assert_eq!(chain.get(), 0);
    }

    #[test]
    fn rebinding_moves_every_subscription_at_once() {
        let registry = SubscriptionRegistry::new();
        let (first, _) = counter(&registry, EventName::AccountsChanged);
        let (second, _) = counter(&registry, EventName::AccountsChanged);

        assert_eq!(registry.rebind(EmitterId::Alternative), EmitterId::Own);
        registry.emit_from(EmitterId::Own, &ProviderEvent::AccountsChanged(vec![]));
        assert_eq!(first.get() + second.get(), 0);

        registry.emit_from(EmitterId::Alternative, &ProviderEvent::AccountsChanged(vec![]));
        assert_eq!((first.get(), second.get()), (1, 1));
    }

    #[test]
    fn removed_listener_is_not_called() {
        let registry = SubscriptionRegistry::new();
        let (count, id) = counter(&registry, EventName::Connect);
        assert!(registry.remove_listener(id));
        assert!(!registry.remove_listener(id));
        registry.emit_from(EmitterId::Own, &ProviderEvent::Connect { chain_id: "0x1".into() });
        assert_eq!(count.get(), 0);
        assert_eq!(registry.listener_count(EventName::Connect), 0);
    }

    #[test]
    fn handlers_may_unsubscribe_reentrantly() {
        let registry = Rc::new(SubscriptionRegistry::new());
        let slot: Rc<Cell<Option<SubscriptionId>>> = Rc::new(Cell::new(None));
        let weak = Rc::downgrade(&registry);
        let own_id = slot.clone();
        let id = registry.on(
            EventName::ChainChanged,
            Rc::new(move |_: &ProviderEvent| {
                if let (Some(r), Some(id)) = (weak.upgrade(), own_id.get()) {
                    r.remove_listener(id);
                }
            }),
        );
        slot.set(Some(id));
        assert_eq!(registry.emit_from(EmitterId::Own, &ProviderEvent::ChainChanged("0x1".into())), 1);
        assert_eq!(registry.emit_from(EmitterId::Own, &ProviderEvent::ChainChanged("0x1".into())), 0);
    }

    #[test]
    fn sink_emits_as_its_source() {
        let registry = Rc::new(SubscriptionRegistry::new());
        let (count, _) = counter(&registry, EventName::ChainChanged);
        let alternative = registry.sink(EmitterId::Alternative);
        alternative(ProviderEvent::ChainChanged("0x1".into()));
        assert_eq!(count.get(), 0);
        registry.rebind(EmitterId::Alternative);
        alternative(ProviderEvent::ChainChanged("0x1".into()));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn payloads_follow_eip1193_shapes() {
        assert_eq!(
            ProviderEvent::Connect { chain_id: "0x1".into() }.payload(),
            serde_json::json!({"chainId": "0x1"})
        );
        assert_eq!(
            ProviderEvent::Disconnect(ProviderRpcError::disconnected("bye")).payload()["code"],
            serde_json::json!(4900)
        );
    }
}
