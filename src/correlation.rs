//! Correlation of outbound requests with their eventual replies.
//!
//! Every `request()` a dApp makes is assigned a fresh [`CorrelationId`] and
//! parked in a [`PendingTable`] until exactly one of three things happens:
//!
//! 1. a response carrying the same id arrives and settles it,
//! 2. the request is handed to another provider, which settles it instead,
//! 3. it is forcibly evicted (rejected) by the host.
//!
//! The settle side is a [`Responder`], a single-use handle: settling consumes
//! it, so a request cannot be settled twice by construction. The dApp side is
//! a [`Deferred`], a future that completes with the outcome.
//!
//! ```text
//!   request() ──> PendingTable::register ──> (id, Deferred) ──> dApp awaits
//!                        │
//!   rpc_response(id) ──> PendingTable::take(id) ──> Responder::settle ──> Deferred ready
//! ```
//!
//! A response whose id has no entry is an orphan: [`PendingTable::settle`]
//! reports `false` and nothing else happens.

use crate::jrpc::{ProviderRpcError, RequestArguments};
use crate::sys::time::{Duration, Instant};
use futures::channel::oneshot;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The outcome of a request, as seen by the dApp.
pub type Outcome = Result<serde_json::Value, ProviderRpcError>;

/// Opaque identifier pairing one outbound call with its response.
///
/// Ids are random UUIDv4 values, so they are unique for the lifetime of a
/// provider and unguessable by other scripts on the page.
///
/// # Examples
///
/// ```
/// use wallet_relay::correlation::CorrelationId;
///
/// let a = CorrelationId::new();
/// let b = CorrelationId::new();
/// assert_ne!(a, b);
///
/// let json = serde_json::to_string(&a).unwrap();
/// let back: CorrelationId = serde_json::from_str(&json).unwrap();
/// assert_eq!(a, back);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Mints a new id.
    pub fn new() -> Self {
        CorrelationId(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Single-use handle that settles one request.
///
/// `resolve` and `reject` take `self`, so whoever owns the responder is the
/// only party that can settle the request, and only once. Dropping a
/// responder without settling it makes the matching [`Deferred`] complete with
/// a disconnected error.
#[derive(Debug)]
pub struct Responder {
    sender: oneshot::Sender<Outcome>,
}

impl Responder {
    /// Settles with `outcome`.
    ///
    /// Returns `false` if the dApp side has already gone away.
    pub fn settle(self, outcome: Outcome) -> bool {
        self.sender.send(outcome).is_ok()
    }

    /// Settles successfully with `value`.
    pub fn resolve(self, value: serde_json::Value) -> bool {
        self.settle(Ok(value))
    }

    /// Settles with an error.
    pub fn reject(self, error: ProviderRpcError) -> bool {
        self.settle(Err(error))
    }
}

/// The dApp-facing half of a request: a future resolving to its [`Outcome`].
///
/// # Examples
///
/// ```
/// use wallet_relay::correlation::deferred;
/// use serde_json::json;
///
/// let (responder, deferred) = deferred();
/// responder.resolve(json!(["0xabc"]));
/// let outcome = futures::executor::block_on(deferred);
/// assert_eq!(outcome.unwrap(), json!(["0xabc"]));
/// ```
#[derive(Debug)]
pub struct Deferred {
    receiver: oneshot::Receiver<Outcome>,
    taken: bool,
}

impl Deferred {
    /// A deferred that is already settled with `outcome`.
    pub fn settled(outcome: Outcome) -> Self {
        let (responder, deferred) = deferred();
        responder.settle(outcome);
        deferred
    }

    /// Takes the outcome without waiting, if the request has been settled.
    ///
    /// Returns `None` while the request is still pending, and again once the
    /// outcome has been taken.
    pub fn try_settled(&mut self) -> Option<Outcome> {
        if self.taken {
            return None;
        }
        let outcome = match self.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => Some(Err(abandoned())),
        };
        self.taken = outcome.is_some();
        outcome
    }
}

impl Future for Deferred {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.taken {
            return Poll::Pending;
        }
        let outcome = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(oneshot::Canceled)) => Err(abandoned()),
            Poll::Pending => return Poll::Pending,
        };
        self.taken = true;
        Poll::Ready(outcome)
    }
}

fn abandoned() -> ProviderRpcError {
    ProviderRpcError::disconnected("The provider was torn down before the request settled.")
}

/// Creates a connected responder/deferred pair.
pub fn deferred() -> (Responder, Deferred) {
    let (sender, receiver) = oneshot::channel();
    (
        Responder { sender },
        Deferred {
            receiver,
            taken: false,
        },
    )
}

/// A request that has been sent but not yet settled.
#[derive(Debug)]
pub struct PendingRequest {
    /// The correlation id the response must carry
    pub id: CorrelationId,
    /// The original call, kept so the request can be re-issued elsewhere
    pub args: RequestArguments,
    /// When the request was registered
    pub registered_at: Instant,
    /// The settle handle
    pub responder: Responder,
}

/// Table of in-flight requests keyed by correlation id.
///
/// Each entry is removed exactly once: by [`settle`](Self::settle),
/// [`take`](Self::take) or [`evict_older_than`](Self::evict_older_than).
///
/// # Examples
///
/// ```
/// use wallet_relay::correlation::PendingTable;
/// use wallet_relay::jrpc::RequestArguments;
/// use serde_json::json;
///
/// let mut table = PendingTable::new();
/// let (id, mut deferred) = table.register(RequestArguments::new("eth_chainId", None));
///
/// assert!(table.settle(id, Ok(json!("0x1"))));
/// // a duplicate delivery is an orphan and changes nothing
/// assert!(!table.settle(id, Ok(json!("0x2"))));
/// assert_eq!(deferred.try_settled(), Some(Ok(json!("0x1"))));
/// ```
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<CorrelationId, PendingRequest>,
}

impl PendingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request and returns its id and dApp-facing future.
    pub fn register(&mut self, args: RequestArguments) -> (CorrelationId, Deferred) {
        let id = CorrelationId::new();
        let (responder, deferred) = deferred();
        self.entries.insert(
            id,
            PendingRequest {
                id,
                args,
                registered_at: Instant::now(),
                responder,
            },
        );
        (id, deferred)
    }

    /// Settles the request `id` with `outcome`.
    ///
    /// Returns `false` if no such request is pending (orphaned, late or duplicate
    /// response). That case is not an error.
    pub fn settle(&mut self, id: CorrelationId, outcome: Outcome) -> bool {
        match self.entries.remove(&id) {
            Some(pending) => {
                pending.responder.settle(outcome);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the request `id` without settling it.
    pub fn take(&mut self, id: CorrelationId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Ids of every pending request, in no particular order.
    pub fn ids(&self) -> Vec<CorrelationId> {
        self.entries.keys().copied().collect()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every request registered more than `max_age` before `now`.
    ///
    /// The removed requests are returned unsettled; the caller decides how to
    /// reject them.
    pub fn evict_older_than(&mut self, now: Instant, max_age: Duration) -> Vec<PendingRequest> {
        let expired: Vec<CorrelationId> = self
            .entries
            .values()
            .filter(|p| now.saturating_duration_since(p.registered_at) > max_age)
            .map(|p| p.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn settle_resolves_only_matching_request() {
        let mut table = PendingTable::new();
        let (first, mut first_deferred) = table.register(RequestArguments::new("eth_accounts", None));
        let (_second, mut second_deferred) =
            table.register(RequestArguments::new("eth_chainId", None));

        assert!(table.settle(first, Ok(json!([]))));
        assert_eq!(first_deferred.try_settled(), Some(Ok(json!([]))));
        assert_eq!(second_deferred.try_settled(), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn outcome_is_taken_once() {
        let (responder, mut deferred) = deferred();
        assert_eq!(deferred.try_settled(), None);
        responder.resolve(json!("0x1"));
        assert_eq!(deferred.try_settled(), Some(Ok(json!("0x1"))));
        // the sender is gone now; that is not a second outcome
        assert_eq!(deferred.try_settled(), None);
        assert_eq!(deferred.try_settled(), None);
    }

    #[test]
    fn unknown_id_is_an_orphan() {
        let mut table = PendingTable::new();
        assert!(!table.settle(CorrelationId::new(), Ok(json!(null))));
        assert!(table.is_empty());
    }

    #[test]
    fn rejection_reaches_the_future() {
        let mut table = PendingTable::new();
        let (id, deferred) = table.register(RequestArguments::new("eth_sendTransaction", None));
        table.settle(id, Err(ProviderRpcError::user_rejected()));
        let outcome = futures::executor::block_on(deferred);
        assert_eq!(outcome, Err(ProviderRpcError::user_rejected()));
    }

    #[test]
    fn dropping_the_table_fails_pending_futures() {
        let mut table = PendingTable::new();
        let (_id, mut deferred) = table.register(RequestArguments::new("eth_accounts", None));
        drop(table);
        let outcome = deferred.try_settled().unwrap();
        assert_eq!(outcome.unwrap_err().code, crate::jrpc::DISCONNECTED);
    }

    #[test]
    fn eviction_only_removes_old_requests() {
        let mut table = PendingTable::new();
        let (old, _old_deferred) = table.register(RequestArguments::new("eth_accounts", None));
        let later = Instant::now() + Duration::from_secs(60);
        let (fresh, _fresh_deferred) = table.register(RequestArguments::new("eth_chainId", None));

        // pretend the fresh request was registered just now relative to `later`
        table.entries.get_mut(&fresh).unwrap().registered_at = later;

        let evicted = table.evict_older_than(later, Duration::from_secs(30));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, old);
        assert!(table.contains(fresh));
    }
}
