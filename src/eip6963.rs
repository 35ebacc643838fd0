//! EIP-6963 multi-wallet discovery.
//!
//! Independent of the single global handle, a wallet announces itself with a
//! page-wide `eip6963:announceProvider` event carrying a frozen
//! `{ info, provider }` detail. It announces once at startup and again every
//! time a dApp dispatches `eip6963:requestProvider`, so pages can enumerate
//! every installed wallet regardless of load order.
//!
//! # Examples
//!
//! ```
//! use wallet_relay::eip6963::{announce, MemoryDiscovery, ProviderDetail, ProviderInfo};
//! use std::rc::Rc;
//!
//! let info = ProviderInfo::new("Example Wallet", "data:image/svg+xml,<svg/>", "com.example.wallet");
//! let detail = Rc::new(ProviderDetail::new(info, "handle"));
//! let page = Rc::new(MemoryDiscovery::new());
//!
//! announce(page.clone(), detail);
//! assert_eq!(page.announcements(), 1);
//! page.request_providers();
//! assert_eq!(page.announcements(), 2);
//! ```

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// The event a wallet dispatches to announce itself.
pub const ANNOUNCE_EVENT: &str = "eip6963:announceProvider";

/// The event a dApp dispatches to ask wallets to announce.
pub const REQUEST_EVENT: &str = "eip6963:requestProvider";

/// Error type for discovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The host could not dispatch the announcement.
    #[error("could not dispatch announcement: {0}")]
    Dispatch(String),
}

/// Self-description of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// UUIDv4, unique per injection
    pub uuid: String,
    /// Human-readable name
    pub name: String,
    /// Icon as a data URI
    pub icon: String,
    /// Reverse-DNS identifier, e.g. `com.example.wallet`
    pub rdns: String,
}

impl ProviderInfo {
    /// Describes a wallet, minting a fresh uuid.
    pub fn new(name: impl Into<String>, icon: impl Into<String>, rdns: impl Into<String>) -> Self {
        ProviderInfo {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            icon: icon.into(),
            rdns: rdns.into(),
        }
    }
}

/// The `{ info, provider }` announcement payload.
///
/// Fields are private and there are no setters; shared behind an `Rc`, the
/// detail cannot change after it is created.
#[derive(Debug)]
pub struct ProviderDetail<H> {
    info: ProviderInfo,
    provider: H,
}

impl<H> ProviderDetail<H> {
    /// Pairs `info` with the provider handle it describes.
    pub fn new(info: ProviderInfo, provider: H) -> Self {
        ProviderDetail { info, provider }
    }

    /// The wallet's self-description.
    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    /// The provider handle.
    pub fn provider(&self) -> &H {
        &self.provider
    }
}

/// The page-wide event target announcements are dispatched on.
pub trait DiscoveryTarget<H>: Debug {
    /// Dispatches `eip6963:announceProvider` with `detail`.
    fn dispatch_announce(&self, detail: &Rc<ProviderDetail<H>>) -> Result<(), Error>;

    /// Calls `listener` whenever a dApp dispatches `eip6963:requestProvider`.
    fn on_request(&self, listener: Box<dyn Fn()>);
}

/// Announces `detail` now and on every later discovery request.
pub fn announce<H, T>(target: Rc<T>, detail: Rc<ProviderDetail<H>>)
where
    H: 'static,
    T: DiscoveryTarget<H> + ?Sized + 'static,
{
    let weak = Rc::downgrade(&target);
    let replay = detail.clone();
    target.on_request(Box::new(move || {
        if let Some(target) = weak.upgrade() {
            dispatch(&*target, &replay);
        }
    }));
    dispatch(&*target, &detail);
}

fn dispatch<H, T: DiscoveryTarget<H> + ?Sized>(target: &T, detail: &Rc<ProviderDetail<H>>) {
    if let Err(e) = target.dispatch_announce(detail) {
        logwise::warn_sync!(
            "eip6963: announcement failed: {e}",
            e = logwise::privacy::LogIt(&e)
        );
    }
}

/// An in-memory event target.
#[derive(Default)]
pub struct MemoryDiscovery {
    announced: RefCell<Vec<ProviderInfo>>,
    listeners: RefCell<Vec<Rc<dyn Fn()>>>,
}

impl Debug for MemoryDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDiscovery")
            .field("announced", &self.announced.borrow().len())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl MemoryDiscovery {
    /// Creates a target with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a dApp dispatching `eip6963:requestProvider`.
    pub fn request_providers(&self) {
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener();
        }
    }

    /// How many announcements were dispatched.
    pub fn announcements(&self) -> usize {
        self.announced.borrow().len()
    }

    /// The most recent announcement.
    pub fn last(&self) -> Option<ProviderInfo> {
        self.announced.borrow().last().cloned()
    }
}

impl<H> DiscoveryTarget<H> for MemoryDiscovery {
    fn dispatch_announce(&self, detail: &Rc<ProviderDetail<H>>) -> Result<(), Error> {
        self.announced.borrow_mut().push(detail.info().clone());
        Ok(())
    }

    fn on_request(&self, listener: Box<dyn Fn()>) {
        self.listeners.borrow_mut().push(Rc::from(listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ProviderInfo {
        ProviderInfo::new("Wallet", "data:image/svg+xml,<svg/>", "dev.wallet")
    }

    #[test]
    fn info_serializes_camel_case_fields() {
        let value = serde_json::to_value(info()).unwrap();
        for key in ["uuid", "name", "icon", "rdns"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(uuid::Uuid::parse_str(value["uuid"].as_str().unwrap()).unwrap().get_version_num(), 4);
    }

    #[test]
    fn every_injection_gets_a_new_uuid() {
        assert_ne!(info().uuid, info().uuid);
    }

    #[test]
    fn replays_the_same_frozen_detail() {
        let page = Rc::new(MemoryDiscovery::new());
        let detail = Rc::new(ProviderDetail::new(info(), ()));
        announce(page.clone(), detail.clone());
        page.request_providers();
        page.request_providers();
        assert_eq!(page.announcements(), 3);
        assert_eq!(page.last().as_ref(), Some(detail.info()));
    }

    #[test]
    fn listener_does_not_keep_target_alive() {
        let page = Rc::new(MemoryDiscovery::new());
        announce(page.clone(), Rc::new(ProviderDetail::new(info(), ())));
        assert_eq!(Rc::strong_count(&page), 1);
    }
}
