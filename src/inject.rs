//! Composition of the page side: provider, arbitration, global handle and
//! discovery, wired onto one bus.
//!
//! [`InjectedWallet::inject`] is what runs when the wallet is injected into a
//! page. It
//!
//! 1. creates the [`PageProvider`] and the [`Arbiter`] in front of it,
//! 2. subscribes the arbiter to the bus, so responses, state events and switch
//!    directives from the embedded UI reach it,
//! 3. installs the global wallet handle, capturing any competitor,
//! 4. announces the wallet over EIP-6963, now and on every later request.
//!
//! Announcing hands the provider to page code synchronously. A host whose
//! provider handle forwards to the wallet must finish wiring it before the
//! first announcement, so [`InjectedWallet::install`] stops after step 3 and
//! [`InjectedWallet::announce`] does step 4.
//!
//! # Examples
//!
//! ```
//! use wallet_relay::bus::LocalBus;
//! use wallet_relay::config::RelayConfig;
//! use wallet_relay::diagnostics::LogDiagnostics;
//! use wallet_relay::eip6963::MemoryDiscovery;
//! use wallet_relay::global::{InjectionOutcome, MemoryGlobal};
//! use wallet_relay::inject::{InjectedWallet, PageHost};
//! use wallet_relay::jrpc::RequestArguments;
//! use wallet_relay::scheduler::TickQueue;
//! use std::rc::Rc;
//!
//! let bus = LocalBus::new();
//! let discovery = Rc::new(MemoryDiscovery::new());
//! let wallet = InjectedWallet::inject(&RelayConfig::default(), PageHost {
//!     handle: (),
//!     bus: Rc::new(bus.clone()),
//!     scheduler: Rc::new(TickQueue::new()),
//!     global: Rc::new(MemoryGlobal::new()),
//!     discovery: discovery.clone(),
//!     diagnostics: Rc::new(LogDiagnostics),
//! }).unwrap();
//!
//! assert_eq!(wallet.injection_outcome(), InjectionOutcome::Installed);
//! assert_eq!(discovery.announcements(), 1);
//!
//! let _accounts = wallet.request(RequestArguments::new("eth_requestAccounts", None));
//! assert_eq!(bus.queued(), 1);
//! ```

use crate::arbitration::{ActiveProvider, Arbiter};
use crate::bus::BroadcastBus;
use crate::config::RelayConfig;
use crate::correlation::Deferred;
use crate::diagnostics::DiagnosticsSink;
use crate::eip6963::{DiscoveryTarget, ProviderDetail, ProviderInfo, announce};
use crate::events::{EventName, Handler, SubscriptionId};
use crate::global::{InjectionOutcome, WalletGlobal, install_handle};
use crate::jrpc::RequestArguments;
use crate::messages::RelayMessage;
use crate::provider::PageProvider;
use crate::scheduler::Scheduler;
use crate::sys::time::{Duration, Instant};
use std::fmt::Debug;
use std::rc::Rc;

/// Error type for injection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] crate::config::Error),
    /// The global handle could not be installed.
    #[error(transparent)]
    Global(#[from] crate::global::Error),
}

/// The page-context collaborators an injection needs.
///
/// `H` is the value dApps receive as the provider: the JS provider object in
/// the browser, anything in tests.
#[derive(Debug)]
pub struct PageHost<H> {
    /// The page-wide bus
    pub bus: Rc<dyn BroadcastBus>,
    /// Next-tick scheduling
    pub scheduler: Rc<dyn Scheduler>,
    /// The global wallet handle
    pub global: Rc<dyn WalletGlobal>,
    /// The EIP-6963 event target
    pub discovery: Rc<dyn DiscoveryTarget<H>>,
    /// Where inconsistencies are reported
    pub diagnostics: Rc<dyn DiagnosticsSink>,
    /// The provider value announced to the page
    pub handle: H,
}

/// This wallet, injected into a page.
#[derive(Debug)]
pub struct InjectedWallet<H> {
    arbiter: Rc<Arbiter>,
    detail: Rc<ProviderDetail<H>>,
    discovery: Rc<dyn DiscoveryTarget<H>>,
    outcome: InjectionOutcome,
    request_timeout: Option<Duration>,
}

/// Shortest interval between eviction sweeps.
const MIN_EVICTION_PERIOD: Duration = Duration::from_millis(250);

impl<H: Debug + 'static> InjectedWallet<H> {
    /// Injects the wallet into the page described by `host` and announces it.
    pub fn inject(config: &RelayConfig, host: PageHost<H>) -> Result<Self, Error> {
        let wallet = Self::install(config, host)?;
        wallet.announce();
        Ok(wallet)
    }

    /// Injects the wallet without announcing it yet.
    pub fn install(config: &RelayConfig, host: PageHost<H>) -> Result<Self, Error> {
        config.validate()?;
        let provider = Rc::new(PageProvider::new(
            host.bus.clone(),
            config.request_timeout(),
        ));
        let arbiter = Rc::new(Arbiter::new(
            provider,
            host.bus.clone(),
            host.scheduler,
            host.diagnostics,
        ));

        let weak = Rc::downgrade(&arbiter);
        host.bus.subscribe(Rc::new(move |message: &RelayMessage| {
            if let Some(arbiter) = weak.upgrade() {
                arbiter.handle_message(message);
            }
        }));

        let outcome = install_handle(&*host.global, &arbiter)?;

        let detail = Rc::new(ProviderDetail::new(
            config.provider_info.mint(),
            host.handle,
        ));
        logwise::info_sync!(
            "InjectedWallet: injected as {uuid} ({outcome})",
            uuid = logwise::privacy::LogIt(&detail.info().uuid),
            outcome = logwise::privacy::LogIt(&outcome)
        );
        Ok(InjectedWallet {
            arbiter,
            detail,
            discovery: host.discovery,
            outcome,
            request_timeout: config.request_timeout(),
        })
    }

    /// Announces the wallet over EIP-6963, now and on every later discovery
    /// request. Call once.
    pub fn announce(&self) {
        announce(self.discovery.clone(), self.detail.clone());
    }

    /// Sends a request to whichever provider is active.
    pub fn request(&self, args: RequestArguments) -> Deferred {
        self.arbiter.request(args)
    }

    /// Subscribes to a provider event. The subscription follows provider
    /// switches.
    pub fn on(&self, event: EventName, handler: Handler) -> SubscriptionId {
        self.arbiter.provider().on(event, handler)
    }

    /// Removes a subscription.
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.arbiter.provider().remove_listener(id)
    }

    /// Whether this wallet exposes an account to the page.
    pub fn is_connected(&self) -> bool {
        self.arbiter.provider().is_connected()
    }

    /// The account this wallet exposes, if any.
    pub fn selected_address(&self) -> Option<String> {
        self.arbiter.provider().selected_address()
    }

    /// The chain this wallet exposes, if known.
    pub fn chain_id(&self) -> Option<String> {
        self.arbiter.provider().chain_id()
    }

    /// The provider answering requests.
    pub fn active(&self) -> ActiveProvider {
        self.arbiter.current()
    }

    /// Rejects pending requests older than the configured timeout.
    pub fn evict_stale(&self, now: Instant) -> usize {
        self.arbiter.provider().evict_stale(now)
    }

    /// How often the host should call [`evict_stale`](Self::evict_stale), or
    /// `None` if no timeout is configured.
    pub fn eviction_period(&self) -> Option<Duration> {
        self.request_timeout
            .map(|timeout| (timeout / 4).max(MIN_EVICTION_PERIOD))
    }

    /// The EIP-6963 self-description.
    pub fn provider_info(&self) -> &ProviderInfo {
        self.detail.info()
    }

    /// The frozen EIP-6963 announcement payload.
    pub fn detail(&self) -> &Rc<ProviderDetail<H>> {
        &self.detail
    }

    /// How the global handle was installed.
    pub fn injection_outcome(&self) -> InjectionOutcome {
        self.outcome
    }

    /// The arbitration layer.
    pub fn arbiter(&self) -> &Rc<Arbiter> {
        &self.arbiter
    }
}
