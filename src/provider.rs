//! The page provider: the object dApps talk to.
//!
//! [`PageProvider`] turns `request()` calls into correlated
//! [`RelayMessage::RpcRequest`]s on the broadcast bus and settles the returned
//! [`Deferred`] when the matching [`RelayMessage::RpcResponse`] comes back. It
//! also turns the wallet's state messages (accounts, chain, connect,
//! disconnect) into provider events and mirrors them in the legacy fields
//! dApps read directly ([`selected_address`](PageProvider::selected_address),
//! [`chain_id`](PageProvider::chain_id)).
//!
//! Nothing here fails synchronously into the page. A request that cannot be
//! sent is rejected through its own [`Deferred`]; a response nobody is waiting
//! for is logged and dropped.
//!
//! # Examples
//!
//! ```
//! use wallet_relay::bus::LocalBus;
//! use wallet_relay::jrpc::RequestArguments;
//! use wallet_relay::messages::RelayMessage;
//! use wallet_relay::provider::PageProvider;
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let bus = LocalBus::new();
//! let provider = PageProvider::new(Rc::new(bus.clone()), None);
//! let mut accounts = provider.request(RequestArguments::new("eth_requestAccounts", None));
//! assert_eq!(provider.pending_count(), 1);
//!
//! // the wallet answers
//! let id = provider.pending_ids()[0];
//! provider.handle_message(&RelayMessage::response(id, Ok(json!(["0xabc"]))));
//! assert_eq!(accounts.try_settled(), Some(Ok(json!(["0xabc"]))));
//! ```

use crate::bus::BroadcastBus;
use crate::correlation::{CorrelationId, Deferred, Outcome, PendingRequest, PendingTable};
use crate::events::{EmitterId, EventName, Handler, ProviderEvent, SubscriptionId, SubscriptionRegistry};
use crate::jrpc::{ProviderRpcError, RequestArguments};
use crate::messages::RelayMessage;
use crate::sys::time::{Duration, Instant};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

/// This wallet's provider object.
pub struct PageProvider {
    bus: Rc<dyn BroadcastBus>,
    pending: RefCell<PendingTable>,
    registry: Rc<SubscriptionRegistry>,
    selected_address: RefCell<Option<String>>,
    chain_id: RefCell<Option<String>>,
    request_timeout: Option<Duration>,
}

impl Debug for PageProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageProvider")
            .field("pending", &self.pending.borrow().len())
            .field("selected_address", &self.selected_address.borrow())
            .field("chain_id", &self.chain_id.borrow())
            .finish()
    }
}

impl PageProvider {
    /// Creates a provider posting to `bus`.
    ///
    /// With a `request_timeout`, [`evict_stale`](Self::evict_stale) rejects
    /// requests older than that; without one, requests wait indefinitely.
    pub fn new(bus: Rc<dyn BroadcastBus>, request_timeout: Option<Duration>) -> Self {
        PageProvider {
            bus,
            pending: RefCell::new(PendingTable::new()),
            registry: Rc::new(SubscriptionRegistry::new()),
            selected_address: RefCell::new(None),
            chain_id: RefCell::new(None),
            request_timeout,
        }
    }

    /// Sends a request to the wallet and returns its eventual outcome.
    pub fn request(&self, args: RequestArguments) -> Deferred {
        if args.method.is_empty() {
            return Deferred::settled(Err(ProviderRpcError::invalid_request(
                "method must be a non-empty string",
            )));
        }
        let method = args.method.clone();
        let params = args.params.clone();
        let (id, deferred) = self.pending.borrow_mut().register(args);
        let message = RelayMessage::RpcRequest { id, method, params };
        if let Err(e) = self.bus.post(&message) {
            logwise::error_sync!(
                "PageProvider: could not post request {id}: {e}",
                id = logwise::privacy::LogIt(&id),
                e = logwise::privacy::LogIt(&e)
            );
            self.pending.borrow_mut().settle(
                id,
                Err(ProviderRpcError::disconnected(format!("relay unavailable: {e}"))),
            );
        }
        deferred
    }

    /// Handles a message received on the bus.
    ///
    /// Returns whether the message kind is one the provider consumes.
    pub fn handle_message(&self, message: &RelayMessage) -> bool {
        match message {
            RelayMessage::RpcResponse { id, result, error } => {
                let outcome: Outcome = match (result, error) {
                    (_, Some(error)) => Err(error.clone()),
                    (Some(result), None) => Ok(result.clone()),
                    (None, None) => Ok(serde_json::Value::Null),
                };
                let settled = self.pending.borrow_mut().settle(*id, outcome);
                if !settled {
                    logwise::warn_sync!(
                        "PageProvider: dropping response for unknown request {id}",
                        id = logwise::privacy::LogIt(id)
                    );
                }
            }
            RelayMessage::AccountChange { accounts } => {
                *self.selected_address.borrow_mut() = accounts.first().cloned();
                self.emit(ProviderEvent::AccountsChanged(accounts.clone()));
            }
            RelayMessage::NetworkChange { chain_id } => {
                *self.chain_id.borrow_mut() = Some(chain_id.clone());
                self.emit(ProviderEvent::ChainChanged(chain_id.clone()));
            }
            RelayMessage::Connect { chain_id } => {
                *self.chain_id.borrow_mut() = Some(chain_id.clone());
                self.emit(ProviderEvent::Connect {
                    chain_id: chain_id.clone(),
                });
            }
            RelayMessage::Disconnect { error } => {
                *self.selected_address.borrow_mut() = None;
                let error = error
                    .clone()
                    .unwrap_or_else(|| ProviderRpcError::disconnected("The wallet disconnected."));
                self.emit(ProviderEvent::Disconnect(error));
            }
            _ => return false,
        }
        true
    }

    /// Emits `event` as this provider. Returns how many handlers ran.
    pub fn emit(&self, event: ProviderEvent) -> usize {
        self.registry.emit_from(EmitterId::Own, &event)
    }

    /// Subscribes to a provider event.
    pub fn on(&self, event: EventName, handler: Handler) -> SubscriptionId {
        self.registry.on(event, handler)
    }

    /// Removes a subscription.
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.registry.remove_listener(id)
    }

    /// The registry holding the page's subscriptions.
    pub fn registry(&self) -> &Rc<SubscriptionRegistry> {
        &self.registry
    }

    /// Removes request `id` without settling it, so someone else can.
    pub fn take_pending(&self, id: CorrelationId) -> Option<PendingRequest> {
        self.pending.borrow_mut().take(id)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Ids of the requests awaiting a response, in no particular order.
    pub fn pending_ids(&self) -> Vec<CorrelationId> {
        self.pending.borrow().ids()
    }

    /// The account exposed to the page, if any.
    pub fn selected_address(&self) -> Option<String> {
        self.selected_address.borrow().clone()
    }

    /// Sets the exposed account without emitting anything.
    pub fn set_selected_address(&self, address: Option<String>) {
        *self.selected_address.borrow_mut() = address;
    }

    /// The chain exposed to the page, if known.
    pub fn chain_id(&self) -> Option<String> {
        self.chain_id.borrow().clone()
    }

    /// Sets the exposed chain without emitting anything.
    pub fn set_chain_id(&self, chain_id: Option<String>) {
        *self.chain_id.borrow_mut() = chain_id;
    }

    /// Whether an account is exposed to the page.
    pub fn is_connected(&self) -> bool {
        self.selected_address.borrow().is_some()
    }

    /// Rejects every request older than the configured timeout.
    ///
    /// Returns how many were rejected; always zero without a timeout.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let Some(max_age) = self.request_timeout else {
            return 0;
        };
        let expired = self.pending.borrow_mut().evict_older_than(now, max_age);
        let count = expired.len();
        for request in expired {
            logwise::warn_sync!(
                "PageProvider: request {id} ({method}) timed out",
                id = logwise::privacy::LogIt(&request.id),
                method = logwise::privacy::LogIt(&request.args.method)
            );
            request
                .responder
                .reject(ProviderRpcError::disconnected("request timed out"));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Error as BusError, LocalBus};
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Debug)]
    struct ClosedBus;

    impl BroadcastBus for ClosedBus {
        fn post(&self, _message: &RelayMessage) -> Result<(), BusError> {
            Err(BusError::Unavailable("closed".into()))
        }

        fn subscribe(&self, _listener: crate::bus::Listener) {}
    }

    fn provider() -> (LocalBus, PageProvider) {
        let bus = LocalBus::new();
        let provider = PageProvider::new(Rc::new(bus.clone()), None);
        (bus, provider)
    }

    fn recorder(provider: &PageProvider, event: EventName) -> Rc<RefCell<Vec<serde_json::Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        provider.on(event, Rc::new(move |e: &ProviderEvent| sink.borrow_mut().push(e.payload())));
        seen
    }

    #[test]
    fn request_posts_a_correlated_message() {
        let (bus, provider) = provider();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(Rc::new(move |m: &RelayMessage| sink.borrow_mut().push(m.clone())));

        let _deferred = provider.request(RequestArguments::new("eth_chainId", None));
        bus.deliver_all();

        let seen = seen.borrow();
        match &seen[..] {
            [RelayMessage::RpcRequest { id, method, params }] => {
                assert_eq!(method, "eth_chainId");
                assert!(params.is_none());
                assert_eq!(provider.pending_ids(), vec![*id]);
            }
            other => panic!("unexpected traffic {other:?}"),
        }
    }

    #[test]
    fn duplicate_response_settles_once() {
        let (_bus, provider) = provider();
        let mut deferred = provider.request(RequestArguments::new("eth_accounts", None));
        let id = provider.pending_ids()[0];

        assert!(provider.handle_message(&RelayMessage::response(id, Ok(json!(["0x1"])))));
        provider.handle_message(&RelayMessage::response(id, Ok(json!(["0x2"]))));
        assert_eq!(deferred.try_settled(), Some(Ok(json!(["0x1"]))));
        assert_eq!(provider.pending_count(), 0);
    }

    #[test]
    fn empty_method_is_rejected_without_posting() {
        let (bus, provider) = provider();
        let mut deferred = provider.request(RequestArguments::new("", None));
        assert_eq!(deferred.try_settled().unwrap().unwrap_err().code, -32600);
        assert_eq!(bus.posted(), 0);
    }

    #[test]
    fn unpostable_request_is_rejected() {
        let provider = PageProvider::new(Rc::new(ClosedBus), None);
        let mut deferred = provider.request(RequestArguments::new("eth_accounts", None));
        let error = deferred.try_settled().unwrap().unwrap_err();
        assert_eq!(error.code, crate::jrpc::DISCONNECTED);
        assert_eq!(provider.pending_count(), 0);
    }

    #[test]
    fn state_messages_update_fields_and_emit() {
        let (_bus, provider) = provider();
        let accounts = recorder(&provider, EventName::AccountsChanged);
        let chains = recorder(&provider, EventName::ChainChanged);
        let disconnects = recorder(&provider, EventName::Disconnect);

        provider.handle_message(&RelayMessage::AccountChange { accounts: vec!["0xabc".into(), "0xdef".into()] });
        provider.handle_message(&RelayMessage::NetworkChange { chain_id: "0x89".into() });
        assert_eq!(provider.selected_address().as_deref(), Some("0xabc"));
        assert_eq!(provider.chain_id().as_deref(), Some("0x89"));
        assert!(provider.is_connected());

        provider.handle_message(&RelayMessage::Disconnect { error: None });
        assert!(!provider.is_connected());
        assert_eq!(*accounts.borrow(), vec![json!(["0xabc", "0xdef"])]);
        assert_eq!(*chains.borrow(), vec![json!("0x89")]);
        assert_eq!(disconnects.borrow()[0]["code"], json!(4900));
    }

    #[test]
    fn connect_message_emits_connect() {
        let (_bus, provider) = provider();
        let connects = recorder(&provider, EventName::Connect);
        provider.handle_message(&RelayMessage::Connect { chain_id: "0x1".into() });
        assert_eq!(*connects.borrow(), vec![json!({"chainId": "0x1"})]);
    }

    #[test]
    fn foreign_kinds_are_not_consumed() {
        let (_bus, provider) = provider();
        assert!(!provider.handle_message(&RelayMessage::Ready));
        assert!(!provider.handle_message(&RelayMessage::AdoptAlternative));
    }

    #[test]
    fn eviction_needs_a_timeout() {
        let (_bus, provider) = provider();
        let _deferred = provider.request(RequestArguments::new("eth_accounts", None));
        assert_eq!(provider.evict_stale(Instant::now() + Duration::from_secs(3600)), 0);
        assert_eq!(provider.pending_count(), 1);
    }

    #[test]
    fn stale_requests_are_rejected() {
        let bus = LocalBus::new();
        let provider = PageProvider::new(Rc::new(bus), Some(Duration::from_secs(30)));
        let mut deferred = provider.request(RequestArguments::new("eth_sign", None));
        assert_eq!(provider.evict_stale(Instant::now()), 0);
        assert_eq!(provider.evict_stale(Instant::now() + Duration::from_secs(60)), 1);
        let error = deferred.try_settled().unwrap().unwrap_err();
        assert_eq!(error.message, "request timed out");
    }
}
