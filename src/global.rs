//! Installation of the page's global wallet handle.
//!
//! A page has one well-known global through which dApps find "the" wallet, and
//! several extensions may want it. Installation goes through a
//! [`WalletGlobal`] accessor rather than a plain assignment:
//!
//! - The handle is installed as an accessor whose getter always yields this
//!   wallet's provider. A *later* assignment by a competitor runs the setter
//!   instead of replacing the value; the competitor is captured as the
//!   alternative provider (first writer wins) and announced to the embedded UI.
//! - A competitor that is *already* installed, configurably, becomes the
//!   alternative provider and the accessor is installed over it.
//! - A competitor that is already installed and locked cannot be replaced.
//!   It is still captured, a plain assignment is attempted on a best-effort
//!   basis, and injection carries on either way.
//!
//! [`install_handle`] implements that policy over any host; [`MemoryGlobal`] is
//! an in-memory host for tests.

use crate::arbitration::{Arbiter, Eip1193Provider};
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// Error type for global handle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The handle is non-configurable; no accessor can be installed.
    #[error("the wallet handle is locked by another provider")]
    Locked,
    /// The handle is read-only; plain assignment had no effect.
    #[error("the wallet handle is read-only")]
    ReadOnly,
    /// The host reported an error.
    #[error("host error: {0}")]
    Host(String),
}

/// What currently occupies the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing is installed
    Vacant,
    /// Something is installed and may be redefined
    Configurable,
    /// Something is installed and may not be redefined
    Locked,
}

/// Called with a competitor that tried to assign the handle.
pub type AssignHook = Rc<dyn Fn(Rc<dyn Eip1193Provider>)>;

/// Access to the page's global wallet handle.
pub trait WalletGlobal: Debug {
    /// What occupies the handle now.
    fn slot_state(&self) -> SlotState;

    /// The provider occupying the handle, if it is not this wallet's.
    fn existing(&self) -> Option<Rc<dyn Eip1193Provider>>;

    /// Installs this wallet's provider as an accessor. Later assignments call
    /// `on_assign` and leave the handle unchanged.
    fn define_accessor(&self, on_assign: AssignHook) -> Result<(), Error>;

    /// Assigns this wallet's provider as a plain value.
    fn assign(&self) -> Result<(), Error>;
}

/// How injection went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The handle was free
    Installed,
    /// A configurable competitor was captured and replaced
    CapturedExisting,
    /// A locked competitor was found; plain assignment was attempted
    BestEffort {
        /// Whether the assignment took effect
        assigned: bool,
    },
}

/// Installs this wallet's handle per the capture-don't-overwrite policy.
///
/// Only host failures on an unlocked handle are errors; a locked handle is
/// logged and reported as [`InjectionOutcome::BestEffort`].
///
/// # Examples
///
/// ```
/// use wallet_relay::arbitration::{Arbiter, ScriptedProvider};
/// use wallet_relay::bus::LocalBus;
/// use wallet_relay::diagnostics::LogDiagnostics;
/// use wallet_relay::global::{install_handle, InjectionOutcome, MemoryGlobal};
/// use wallet_relay::provider::PageProvider;
/// use wallet_relay::scheduler::TickQueue;
/// use std::rc::Rc;
///
/// let bus = Rc::new(LocalBus::new());
/// let provider = Rc::new(PageProvider::new(bus.clone(), None));
/// let arbiter = Rc::new(Arbiter::new(provider, bus, Rc::new(TickQueue::new()), Rc::new(LogDiagnostics)));
///
/// let global = MemoryGlobal::new();
/// assert_eq!(install_handle(&global, &arbiter).unwrap(), InjectionOutcome::Installed);
///
/// // a competitor loading later is captured, not installed
/// global.page_assign(Rc::new(ScriptedProvider::new("Other Wallet")));
/// assert!(global.holds_own());
/// assert!(arbiter.state().alternative().is_some());
/// ```
pub fn install_handle(
    global: &dyn WalletGlobal,
    arbiter: &Rc<Arbiter>,
) -> Result<InjectionOutcome, Error> {
    let weak = Rc::downgrade(arbiter);
    let on_assign: AssignHook = Rc::new(move |competitor: Rc<dyn Eip1193Provider>| {
        if let Some(arbiter) = weak.upgrade() {
            arbiter.capture_alternative(competitor);
        }
    });
    match global.slot_state() {
        SlotState::Vacant => {
            global.define_accessor(on_assign)?;
            logwise::info_sync!("install_handle: wallet handle installed");
            Ok(InjectionOutcome::Installed)
        }
        SlotState::Configurable => {
            if let Some(existing) = global.existing() {
                arbiter.capture_alternative(existing);
            }
            global.define_accessor(on_assign)?;
            logwise::info_sync!("install_handle: wallet handle installed over a competitor");
            Ok(InjectionOutcome::CapturedExisting)
        }
        SlotState::Locked => {
            logwise::error_sync!(
                "install_handle: wallet handle is locked by another provider; assigning best-effort"
            );
            if let Some(existing) = global.existing() {
                arbiter.capture_alternative(existing);
            }
            let assigned = match global.assign() {
                Ok(()) => true,
                Err(e) => {
                    logwise::warn_sync!(
                        "install_handle: best-effort assignment failed: {e}",
                        e = logwise::privacy::LogIt(&e)
                    );
                    false
                }
            };
            Ok(InjectionOutcome::BestEffort { assigned })
        }
    }
}

#[derive(Debug, Clone)]
enum Occupant {
    Empty,
    Own,
    Foreign(Rc<dyn Eip1193Provider>),
}

#[derive(Debug)]
struct MemoryGlobalInner {
    occupant: Occupant,
    configurable: bool,
    writable: bool,
    hook: Option<HookSlot>,
}

struct HookSlot(AssignHook);

impl Debug for HookSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AssignHook")
    }
}

/// An in-memory wallet handle. Clones share the same handle.
#[derive(Debug, Clone)]
pub struct MemoryGlobal {
    inner: Rc<RefCell<MemoryGlobalInner>>,
}

impl Default for MemoryGlobal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGlobal {
    /// A vacant handle.
    pub fn new() -> Self {
        MemoryGlobal {
            inner: Rc::new(RefCell::new(MemoryGlobalInner {
                occupant: Occupant::Empty,
                configurable: true,
                writable: true,
                hook: None,
            })),
        }
    }

    /// A handle already holding `competitor`.
    ///
    /// A non-configurable handle is also read-only when `writable` is `false`.
    pub fn occupied(competitor: Rc<dyn Eip1193Provider>, configurable: bool, writable: bool) -> Self {
        MemoryGlobal {
            inner: Rc::new(RefCell::new(MemoryGlobalInner {
                occupant: Occupant::Foreign(competitor),
                configurable,
                writable,
                hook: None,
            })),
        }
    }

    /// Simulates a page script assigning `provider` to the handle.
    pub fn page_assign(&self, provider: Rc<dyn Eip1193Provider>) {
        let hook = self.inner.borrow().hook.as_ref().map(|h| h.0.clone());
        match hook {
            Some(hook) => hook(provider),
            None => {
                let mut inner = self.inner.borrow_mut();
                if inner.writable {
                    inner.occupant = Occupant::Foreign(provider);
                }
            }
        }
    }

    /// Whether reading the handle yields this wallet's provider.
    pub fn holds_own(&self) -> bool {
        matches!(self.inner.borrow().occupant, Occupant::Own)
    }
}

impl WalletGlobal for MemoryGlobal {
    fn slot_state(&self) -> SlotState {
        let inner = self.inner.borrow();
        match (&inner.occupant, inner.configurable) {
            (Occupant::Empty, _) => SlotState::Vacant,
            (_, true) => SlotState::Configurable,
            (_, false) => SlotState::Locked,
        }
    }

    fn existing(&self) -> Option<Rc<dyn Eip1193Provider>> {
        match &self.inner.borrow().occupant {
            Occupant::Foreign(provider) => Some(provider.clone()),
            Occupant::Empty | Occupant::Own => None,
        }
    }

    fn define_accessor(&self, on_assign: AssignHook) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if !inner.configurable {
            return Err(Error::Locked);
        }
        inner.occupant = Occupant::Own;
        inner.hook = Some(HookSlot(on_assign));
        Ok(())
    }

    fn assign(&self) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if !inner.writable {
            return Err(Error::ReadOnly);
        }
        inner.occupant = Occupant::Own;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::ScriptedProvider;
    use crate::bus::LocalBus;
    use crate::diagnostics::LogDiagnostics;
    use crate::messages::RelayMessage;
    use crate::provider::PageProvider;
    use crate::scheduler::TickQueue;

    fn arbiter(bus: &LocalBus) -> Rc<Arbiter> {
        let bus: Rc<LocalBus> = Rc::new(bus.clone());
        let provider = Rc::new(PageProvider::new(bus.clone(), None));
        Rc::new(Arbiter::new(
            provider,
            bus,
            Rc::new(TickQueue::new()),
            Rc::new(LogDiagnostics),
        ))
    }

    fn announced(bus: &LocalBus) -> Vec<Option<String>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        crate::bus::BroadcastBus::subscribe(
            bus,
            Rc::new(move |m: &RelayMessage| {
                if let RelayMessage::ProviderAnnouncement { name } = m {
                    sink.borrow_mut().push(name.clone());
                }
            }),
        );
        bus.deliver_all();
        let result = seen.borrow().clone();
        result
    }

    #[test]
    fn configurable_competitor_is_captured_and_replaced() {
        let bus = LocalBus::new();
        let arbiter = arbiter(&bus);
        let global = MemoryGlobal::occupied(Rc::new(ScriptedProvider::new("early")), true, true);

        assert_eq!(install_handle(&global, &arbiter), Ok(InjectionOutcome::CapturedExisting));
        assert!(global.holds_own());
        assert_eq!(announced(&bus), vec![Some("early".to_string())]);
    }

    #[test]
    fn later_competitors_after_the_first_are_ignored() {
        let bus = LocalBus::new();
        let arbiter = arbiter(&bus);
        let global = MemoryGlobal::new();
        install_handle(&global, &arbiter).unwrap();

        global.page_assign(Rc::new(ScriptedProvider::new("first")));
        global.page_assign(Rc::new(ScriptedProvider::new("second")));
        assert!(global.holds_own());
        let state = arbiter.state();
        assert_eq!(state.alternative().and_then(|a| a.name()).as_deref(), Some("first"));
        assert_eq!(announced(&bus), vec![Some("first".to_string())]);
    }

    #[test]
    fn locked_writable_handle_is_assigned_best_effort() {
        let bus = LocalBus::new();
        let arbiter = arbiter(&bus);
        let global = MemoryGlobal::occupied(Rc::new(ScriptedProvider::new("locked")), false, true);

        assert_eq!(
            install_handle(&global, &arbiter),
            Ok(InjectionOutcome::BestEffort { assigned: true })
        );
        assert!(global.holds_own());
        assert!(arbiter.state().alternative().is_some());
    }

    #[test]
    fn locked_read_only_handle_does_not_fail_injection() {
        let bus = LocalBus::new();
        let arbiter = arbiter(&bus);
        let global = MemoryGlobal::occupied(Rc::new(ScriptedProvider::new("frozen")), false, false);

        assert_eq!(
            install_handle(&global, &arbiter),
            Ok(InjectionOutcome::BestEffort { assigned: false })
        );
        assert!(!global.holds_own());
        // the frozen competitor is still offered as the alternative
        assert!(arbiter.state().alternative().is_some());
    }
}
