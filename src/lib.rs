/*!
Wallet provider injection, arbitration and multi-context message relay for
browser-extension wallets.

wallet-relay is the plumbing between a web page, an extension's isolated
content script, and the wallet UI the extension embeds in the page. It gives
dApps a standard EIP-1193 provider, coexists with other installed wallets, and
carries every request and state change across three JavaScript contexts that
cannot call each other directly.

# Overview

A browser wallet lives in three places at once:

```text
 page context                  isolated context               embedded surface
┌──────────────┐   page bus   ┌────────────────┐   frames   ┌──────────────┐
│ PageProvider │ ◀──────────▶ │ ContextBridge  │ ◀────────▶ │  wallet UI   │
│  + Arbiter   │              │ (handshake,    │            │              │
│ window.ethereum             │  buffer, drag) │            │              │
└──────────────┘              └────────────────┘            └──────────────┘
```

- The **page provider** is what dApps see. It turns `request()` calls into
  correlated bus messages and turns state messages back into EIP-1193 events.
- The **arbiter** decides whether this wallet or a competitor answers. The
  user can hand the page to the other wallet and take it back without the
  dApp noticing, since subscriptions follow the switch.
- The **context bridge** forwards traffic to and from the surface, refuses
  frames from anything but its own surface, buffers until the surface is
  ready, and positions the floating frame.

# Key Features

- **EIP-1193 provider** with correlated requests that settle exactly once
- **EIP-6963 discovery** announced at startup and on every request
- **Competitor capture** through the `window.ethereum` accessor, whatever the
  load order
- **Mutual authentication** between the bridge and the surface it mounted
- **No async runtime**: single-threaded, callback driven, `Rc` throughout

# Quick Start

Everything platform specific sits behind a trait, so the whole relay runs in
plain Rust with in-memory collaborators:

```
use wallet_relay::bus::LocalBus;
use wallet_relay::config::RelayConfig;
use wallet_relay::diagnostics::LogDiagnostics;
use wallet_relay::eip6963::MemoryDiscovery;
use wallet_relay::global::MemoryGlobal;
use wallet_relay::inject::{InjectedWallet, PageHost};
use wallet_relay::jrpc::RequestArguments;
use wallet_relay::messages::RelayMessage;
use wallet_relay::scheduler::TickQueue;
use wallet_relay::bus::BroadcastBus;
use serde_json::json;
use std::rc::Rc;

let bus = LocalBus::new();
let wallet = InjectedWallet::inject(&RelayConfig::default(), PageHost {
    handle: (),
    bus: Rc::new(bus.clone()),
    scheduler: Rc::new(TickQueue::new()),
    global: Rc::new(MemoryGlobal::new()),
    discovery: Rc::new(MemoryDiscovery::new()),
    diagnostics: Rc::new(LogDiagnostics),
}).unwrap();

let mut chain = wallet.request(RequestArguments::new("eth_chainId", None));
let id = wallet.arbiter().provider().pending_ids()[0];

// the wallet UI answers over the bus
bus.post(&RelayMessage::response(id, Ok(json!("0x1")))).unwrap();
bus.deliver_all();
assert_eq!(chain.try_settled(), Some(Ok(json!("0x1"))));
```

In a browser, the `web` module supplies the real collaborators and exports
`inject_page_provider` and `start_context_bridge` to JavaScript.

# Module Organization

- [`messages`] - Wire format of the bus and the surface channel
- [`jrpc`] - EIP-1193 request arguments and error codes
- [`correlation`] - Correlation ids and the pending-request table
- [`events`] - Provider events and switchable subscriptions
- [`provider`] - The page provider
- [`arbitration`] - Choosing between this wallet and a competitor
- [`global`] - Installing the `window.ethereum` handle
- [`eip6963`] - Multi-wallet discovery
- [`bridge`] - The context bridge, its handshake, buffer and layout
- [`inject`] - Composition of the page side
- [`config`] - Configuration
- [`bus`], [`scheduler`], [`diagnostics`] - Host seams and their in-memory versions
*/
pub mod arbitration;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod correlation;
pub mod diagnostics;
pub mod eip6963;
pub mod events;
pub mod global;
pub mod inject;
pub mod jrpc;
pub mod messages;
pub mod provider;
pub mod scheduler;
pub mod sys;
#[cfg(target_arch = "wasm32")]
pub mod web;
