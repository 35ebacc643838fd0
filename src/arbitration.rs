//! Which provider answers the page.
//!
//! Another wallet extension may also try to be the page's provider. When the
//! handle is installed, a competing provider is not overwritten; it is kept as
//! the *alternative* (see [`global`](crate::global)) and the embedded UI is told
//! about it, so the user can choose. The [`Arbiter`] then carries out the
//! UI's decisions:
//!
//! ```text
//!                 adopt_alternative (requires an alternative)
//!   ┌─────┐  ───────────────────────────────────────────>  ┌─────────────┐
//!   │ Own │                                                │ Alternative │
//!   └─────┘  <───────────────────────────────────────────  └─────────────┘
//!                 reclaim_self { selectedAddress, chainId }
//! ```
//!
//! Switching rebinds every page subscription to the incoming provider in one
//! step. Adopting also clears this wallet's selected address, so the page sees
//! it as disconnected rather than holding a stale account. Reclaiming restores
//! the supplied account and chain and emits `accountsChanged` and
//! `chainChanged` on the *next tick* of the [`Scheduler`].
//!
//! Independently of the switch, a single in-flight request can be handed to
//! the alternative with `delegate_call`; its dApp promise is then settled by
//! the alternative. If there is no alternative it is rejected with a
//! user-rejection error instead, and the inconsistency is reported.

use crate::bus::BroadcastBus;
use crate::correlation::{CorrelationId, Deferred, Responder, deferred};
use crate::diagnostics::{DiagnosticsSink, Inconsistency};
use crate::events::{EmitterId, EventSink, ProviderEvent};
use crate::jrpc::{ProviderRpcError, RequestArguments};
use crate::messages::RelayMessage;
use crate::provider::PageProvider;
use crate::scheduler::Scheduler;
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

/// A provider that is not this wallet's, e.g. another installed extension.
pub trait Eip1193Provider: Debug {
    /// Starts `args` and settles `responder` with its outcome.
    fn request(&self, args: RequestArguments, responder: Responder);

    /// Forwards every event this provider emits to `sink`.
    fn subscribe(&self, sink: EventSink);

    /// The provider's self-reported name, if any.
    fn name(&self) -> Option<String> {
        None
    }
}

/// The provider currently answering `request()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveProvider {
    /// This wallet
    Own,
    /// The captured competitor
    Alternative,
}

/// Arbitration state for the lifetime of the page.
#[derive(Debug, Clone)]
pub struct ProviderState {
    current: ActiveProvider,
    alternative: Option<Rc<dyn Eip1193Provider>>,
}

impl Default for ProviderState {
    fn default() -> Self {
        ProviderState {
            current: ActiveProvider::Own,
            alternative: None,
        }
    }
}

impl ProviderState {
    /// The provider answering requests.
    pub fn current(&self) -> ActiveProvider {
        self.current
    }

    /// The captured competitor, if any.
    pub fn alternative(&self) -> Option<&Rc<dyn Eip1193Provider>> {
        self.alternative.as_ref()
    }
}

/// Error type for arbitration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No competing provider was captured.
    #[error("no alternative provider was detected")]
    NoAlternative,
}

/// Routes page requests to the active provider and applies switch directives.
#[derive(Debug)]
pub struct Arbiter {
    provider: Rc<PageProvider>,
    state: RefCell<ProviderState>,
    bus: Rc<dyn BroadcastBus>,
    scheduler: Rc<dyn Scheduler>,
    diagnostics: Rc<dyn DiagnosticsSink>,
}

impl Arbiter {
    /// Creates an arbiter answering with `provider` until told otherwise.
    pub fn new(
        provider: Rc<PageProvider>,
        bus: Rc<dyn BroadcastBus>,
        scheduler: Rc<dyn Scheduler>,
        diagnostics: Rc<dyn DiagnosticsSink>,
    ) -> Self {
        Arbiter {
            provider,
            state: RefCell::new(ProviderState::default()),
            bus,
            scheduler,
            diagnostics,
        }
    }

    /// This wallet's provider.
    pub fn provider(&self) -> &Rc<PageProvider> {
        &self.provider
    }

    /// A snapshot of the arbitration state.
    pub fn state(&self) -> ProviderState {
        self.state.borrow().clone()
    }

    /// The provider answering requests.
    pub fn current(&self) -> ActiveProvider {
        self.state.borrow().current
    }

    /// Sends a page request to the active provider.
    pub fn request(&self, args: RequestArguments) -> Deferred {
        let target = {
            let state = self.state.borrow();
            match state.current {
                ActiveProvider::Own => None,
                ActiveProvider::Alternative => state.alternative.clone(),
            }
        };
        match target {
            None => self.provider.request(args),
            Some(alternative) => {
                let (responder, deferred) = deferred();
                alternative.request(args, responder);
                deferred
            }
        }
    }

    /// Records `candidate` as the alternative provider.
    ///
    /// Only the first competitor is kept; later ones are ignored and `false` is
    /// returned. On capture the page's subscriptions start receiving the
    /// competitor's events whenever it is active, and the embedded UI is told
    /// about it with a `provider_announcement`.
    pub fn capture_alternative(&self, candidate: Rc<dyn Eip1193Provider>) -> bool {
        let name = candidate.name();
        {
            let mut state = self.state.borrow_mut();
            if state.alternative.is_some() {
                logwise::warn_sync!(
                    "Arbiter: ignoring additional competing provider {name}",
                    name = logwise::privacy::LogIt(&name)
                );
                return false;
            }
            state.alternative = Some(candidate.clone());
        }
        logwise::info_sync!(
            "Arbiter: captured competing provider {name}",
            name = logwise::privacy::LogIt(&name)
        );
        candidate.subscribe(self.provider.registry().sink(EmitterId::Alternative));
        if let Err(e) = self.bus.post(&RelayMessage::ProviderAnnouncement { name }) {
            logwise::warn_sync!(
                "Arbiter: could not announce competing provider: {e}",
                e = logwise::privacy::LogIt(&e)
            );
        }
        true
    }

    /// Makes the alternative answer from now on.
    ///
    /// Without an alternative nothing changes; the inconsistency is reported and
    /// [`Error::NoAlternative`] returned.
    pub fn adopt_alternative(&self) -> Result<(), Error> {
        {
            let mut state = self.state.borrow_mut();
            if state.alternative.is_none() {
                drop(state);
                self.diagnostics
                    .report(&Inconsistency::AdoptWithoutAlternative);
                return Err(Error::NoAlternative);
            }
            state.current = ActiveProvider::Alternative;
        }
        self.provider.registry().rebind(EmitterId::Alternative);
        self.provider.set_selected_address(None);
        logwise::info_sync!("Arbiter: alternative provider adopted");
        Ok(())
    }

    /// Makes this wallet answer again, exposing `selected_address` and `chain_id`.
    ///
    /// The matching `accountsChanged` and `chainChanged` events are emitted on
    /// the next scheduler tick.
    pub fn reclaim_self(&self, selected_address: Option<String>, chain_id: String) {
        self.state.borrow_mut().current = ActiveProvider::Own;
        self.provider.registry().rebind(EmitterId::Own);
        self.provider.set_selected_address(selected_address.clone());
        self.provider.set_chain_id(Some(chain_id.clone()));
        logwise::info_sync!("Arbiter: own provider reclaimed");

        let accounts: Vec<String> = selected_address.into_iter().collect();
        let registry = Rc::downgrade(self.provider.registry());
        self.scheduler
            .next_tick(emit_later(registry.clone(), ProviderEvent::AccountsChanged(accounts)));
        self.scheduler
            .next_tick(emit_later(registry, ProviderEvent::ChainChanged(chain_id)));
    }

    /// Hands pending request `id` to the alternative provider.
    ///
    /// Without an alternative the request is rejected with a user-rejection
    /// error, and the directive is reported as an inconsistency whether or
    /// not `id` is still pending. An unknown `id` (already settled) is
    /// otherwise ignored.
    pub fn delegate_call(&self, id: CorrelationId) {
        let alternative = self.state.borrow().alternative.clone();
        let Some(alternative) = alternative else {
            self.diagnostics
                .report(&Inconsistency::DelegateWithoutAlternative { id });
            if let Some(pending) = self.provider.take_pending(id) {
                pending.responder.reject(ProviderRpcError::user_rejected());
            }
            return;
        };
        let Some(pending) = self.provider.take_pending(id) else {
            logwise::warn_sync!(
                "Arbiter: cannot delegate {id}, it is not pending",
                id = logwise::privacy::LogIt(&id)
            );
            return;
        };
        logwise::info_sync!(
            "Arbiter: delegating {id} to the alternative provider",
            id = logwise::privacy::LogIt(&id)
        );
        alternative.request(pending.args, pending.responder);
    }

    /// Handles a message received on the bus.
    ///
    /// Switch directives are applied here; everything else goes to the page
    /// provider. Returns whether the message was consumed.
    pub fn handle_message(&self, message: &RelayMessage) -> bool {
        match message {
            RelayMessage::AdoptAlternative => {
                // already reported; the page keeps its current provider
                let _ = self.adopt_alternative();
                true
            }
            RelayMessage::ReclaimSelf {
                selected_address,
                chain_id,
            } => {
                self.reclaim_self(selected_address.clone(), chain_id.clone());
                true
            }
            RelayMessage::DelegateCall { id } => {
                self.delegate_call(*id);
                true
            }
            other => self.provider.handle_message(other),
        }
    }
}

fn emit_later(
    registry: Weak<crate::events::SubscriptionRegistry>,
    event: ProviderEvent,
) -> crate::scheduler::Task {
    Box::new(move || {
        if let Some(registry) = registry.upgrade() {
            registry.emit_from(EmitterId::Own, &event);
        }
    })
}

/// An in-memory competing provider. Clones share the same state.
///
/// Requests are recorded and answered later with [`answer`](Self::answer);
/// events are emitted with [`emit`](Self::emit).
///
/// # Examples
///
/// ```
/// use wallet_relay::arbitration::{Eip1193Provider, ScriptedProvider};
/// use wallet_relay::correlation::deferred;
/// use wallet_relay::jrpc::RequestArguments;
/// use serde_json::json;
///
/// let other = ScriptedProvider::new("Other Wallet");
/// let (responder, mut outcome) = deferred();
/// other.request(RequestArguments::new("eth_accounts", None), responder);
/// assert_eq!(other.requests(), vec!["eth_accounts".to_string()]);
///
/// other.answer(Ok(json!(["0xother"])));
/// assert_eq!(outcome.try_settled(), Some(Ok(json!(["0xother"]))));
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    inner: Rc<RefCell<ScriptedInner>>,
}

#[derive(Default)]
struct ScriptedInner {
    name: Option<String>,
    requests: Vec<String>,
    waiting: std::collections::VecDeque<Responder>,
    sinks: Vec<EventSink>,
}

impl Debug for ScriptedInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInner")
            .field("name", &self.name)
            .field("requests", &self.requests)
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

impl ScriptedProvider {
    /// Creates a provider reporting `name`.
    pub fn new(name: &str) -> Self {
        ScriptedProvider {
            inner: Rc::new(RefCell::new(ScriptedInner {
                name: Some(name.to_owned()),
                ..ScriptedInner::default()
            })),
        }
    }

    /// Methods requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner.borrow().requests.clone()
    }

    /// Settles the oldest unanswered request. Returns `false` if none is waiting.
    pub fn answer(&self, outcome: crate::correlation::Outcome) -> bool {
        let responder = self.inner.borrow_mut().waiting.pop_front();
        match responder {
            Some(responder) => {
                responder.settle(outcome);
                true
            }
            None => false,
        }
    }

    /// Emits `event` to every subscriber.
    pub fn emit(&self, event: ProviderEvent) {
        let sinks = self.inner.borrow().sinks.clone();
        for sink in sinks {
            sink(event.clone());
        }
    }
}

impl Eip1193Provider for ScriptedProvider {
    fn request(&self, args: RequestArguments, responder: Responder) {
        let mut inner = self.inner.borrow_mut();
        inner.requests.push(args.method);
        inner.waiting.push_back(responder);
    }

    fn subscribe(&self, sink: EventSink) {
        self.inner.borrow_mut().sinks.push(sink);
    }

    fn name(&self) -> Option<String> {
        self.inner.borrow().name.clone()
    }
}
