//! Browser adapters and entry points.
//!
//! Everything in the rest of the crate talks to the host through traits. This
//! module implements them on top of `web-sys`:
//!
//! | trait | browser implementation |
//! |---|---|
//! | [`BroadcastBus`] | [`PostMessageBus`]: same-window `postMessage` with channel-tagged envelopes |
//! | [`SurfaceChannel`] | [`FrameChannel`]: `postMessage` to the surface window |
//! | [`SurfaceView`] | [`IframeSurface`]: the fixed-position frame and its overlay |
//! | [`VisualStore`] | [`LocalStorageStore`] |
//! | [`Scheduler`] | [`TimeoutScheduler`]: zero-delay `setTimeout` |
//! | [`WalletGlobal`] | [`ReflectGlobal`]: `window.ethereum` via `Reflect` |
//! | [`Eip1193Provider`] | [`JsProvider`]: a competitor's JS provider object |
//! | [`DiscoveryTarget`] | [`WindowDiscovery`]: `eip6963:*` events on `window` |
//!
//! Two `#[wasm_bindgen]` entry points tie them together: [`inject_page_provider`]
//! for the page script and [`start_context_bridge`] for the isolated script.
#![cfg(target_arch = "wasm32")]

use crate::arbitration::Eip1193Provider;
use crate::bridge::visual::{StoreError, Viewport, VisualState, VisualStore};
use crate::bridge::{BridgeHost, ContextBridge, SurfaceChannel, SurfaceView};
use crate::bus::{BroadcastBus, Listener};
use crate::config::RelayConfig;
use crate::correlation::Responder;
use crate::diagnostics::LogDiagnostics;
use crate::eip6963::{ANNOUNCE_EVENT, DiscoveryTarget, ProviderDetail, REQUEST_EVENT};
use crate::events::{EventName, EventSink, ProviderEvent, SubscriptionId};
use crate::global::{AssignHook, SlotState, WalletGlobal};
use crate::inject::{InjectedWallet, PageHost};
use crate::jrpc::{ProviderRpcError, RequestArguments};
use crate::messages::{BusEnvelope, ChannelFrame, RelayMessage};
use crate::scheduler::{Scheduler, Task};
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use js_sys::{Function, JSON, Object, Promise, Reflect};
use web_sys::{HtmlElement, HtmlIFrameElement, MessageEvent, Window};

/// The page global dApps look the wallet up under.
const WALLET_GLOBAL: &str = "ethereum";

fn js_error(e: &JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{e:?}"))
}

/// Converts serde data to a plain JS value.
fn to_js<T: serde::Serialize>(value: &T) -> JsValue {
    serde_json::to_string(value)
        .ok()
        .and_then(|text| JSON::parse(&text).ok())
        .unwrap_or(JsValue::NULL)
}

/// Converts a plain JS value to JSON; `undefined` and non-JSON values become `null`.
fn from_js(value: &JsValue) -> serde_json::Value {
    if value.is_undefined() {
        return serde_json::Value::Null;
    }
    JSON::stringify(value)
        .ok()
        .and_then(|text| text.as_string())
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or(serde_json::Value::Null)
}

/// Whether `source` is `window` itself.
fn is_same_window(source: Option<Object>, window: &Window) -> bool {
    source
        .map(|source| JsValue::from(source) == JsValue::from(window.clone()))
        .unwrap_or(false)
}

fn window() -> Result<Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))
}

fn viewport(window: &Window) -> Viewport {
    let width = window.inner_width().ok().and_then(|w| w.as_f64()).unwrap_or(0.0);
    let height = window.inner_height().ok().and_then(|h| h.as_f64()).unwrap_or(0.0);
    Viewport::new(width, height)
}

fn config_from(json: Option<String>) -> Result<RelayConfig, JsValue> {
    match json {
        Some(json) => RelayConfig::from_json(&json).map_err(|e| JsValue::from_str(&e.to_string())),
        None => Ok(RelayConfig::default()),
    }
}

/// The page-wide bus over same-window `postMessage`.
#[derive(Debug, Clone)]
pub struct PostMessageBus {
    window: Window,
    channel: String,
}

impl PostMessageBus {
    /// A bus on `window` tagged with `channel`.
    pub fn new(window: Window, channel: &str) -> Self {
        PostMessageBus {
            window,
            channel: channel.to_owned(),
        }
    }
}

impl BroadcastBus for PostMessageBus {
    fn post(&self, message: &RelayMessage) -> Result<(), crate::bus::Error> {
        let raw = BusEnvelope::encode(&self.channel, message)?;
        let origin = self
            .window
            .location()
            .origin()
            .map_err(|e| crate::bus::Error::Unavailable(js_error(&e)))?;
        self.window
            .post_message(&JsValue::from_str(&raw), &origin)
            .map_err(|e| crate::bus::Error::Unavailable(js_error(&e)))
    }

    fn subscribe(&self, listener: Listener) {
        let window = self.window.clone();
        let channel = self.channel.clone();
        let callback = Closure::wrap(Box::new(move |event: MessageEvent| {
            if !is_same_window(event.source(), &window) {
                return;
            }
            let Some(raw) = event.data().as_string() else {
                return;
            };
            match BusEnvelope::decode(&raw, &channel) {
                Ok(message) => listener(&message),
                Err(crate::messages::Error::ForeignChannel(_)) => {}
                Err(e) => {
                    logwise::warn_sync!(
                        "PostMessageBus: dropping malformed message: {e}",
                        e = logwise::privacy::LogIt(&e)
                    );
                }
            }
        }) as Box<dyn FnMut(_)>);
        if let Err(e) = self
            .window
            .add_event_listener_with_callback("message", callback.as_ref().unchecked_ref())
        {
            logwise::error_sync!(
                "PostMessageBus: cannot listen: {e}",
                e = logwise::privacy::LogIt(&js_error(&e))
            );
        }
        callback.forget(); //leak the closure
    }
}

/// Frames to the surface window, restricted to the surface's origin.
#[derive(Debug, Clone)]
pub struct FrameChannel {
    target_origin: String,
}

impl FrameChannel {
    /// A channel to windows on the origin of `surface_url`.
    pub fn new(surface_url: &url::Url) -> Self {
        let target_origin = match surface_url.port() {
            Some(port) => format!(
                "{}://{}:{}",
                surface_url.scheme(),
                surface_url.host_str().unwrap_or_default(),
                port
            ),
            None => format!(
                "{}://{}",
                surface_url.scheme(),
                surface_url.host_str().unwrap_or_default()
            ),
        };
        FrameChannel { target_origin }
    }
}

impl SurfaceChannel<Window> for FrameChannel {
    fn post(&self, target: &Window, frame: &ChannelFrame) -> Result<(), crate::bridge::Error> {
        let raw = frame.encode()?;
        target
            .post_message(&JsValue::from_str(&raw), &self.target_origin)
            .map_err(|e| crate::bridge::Error::Channel(js_error(&e)))
    }
}

/// The surface frame and the overlay beneath it.
#[derive(Debug, Clone)]
pub struct IframeSurface {
    frame: HtmlIFrameElement,
    overlay: HtmlElement,
}

fn set_styles(element: &HtmlElement, styles: &[(&str, &str)]) {
    let style = element.style();
    for (name, value) in styles {
        if let Err(e) = style.set_property(name, value) {
            logwise::warn_sync!(
                "IframeSurface: cannot set {name}: {e}",
                name = logwise::privacy::LogIt(name),
                e = logwise::privacy::LogIt(&js_error(&e))
            );
        }
    }
}

impl IframeSurface {
    /// Creates the overlay and the frame loading `url`, and attaches both.
    pub fn mount(document: &web_sys::Document, url: &url::Url) -> Result<Self, JsValue> {
        let overlay: HtmlElement = document.create_element("div")?.dyn_into()?;
        set_styles(
            &overlay,
            &[
                ("position", "fixed"),
                ("inset", "0"),
                ("background", "rgba(0, 0, 0, 0.4)"),
                ("z-index", "2147483646"),
                ("display", "none"),
            ],
        );
        let frame: HtmlIFrameElement = document.create_element("iframe")?.dyn_into()?;
        frame.set_src(url.as_str());
        set_styles(
            &frame,
            &[
                ("position", "fixed"),
                ("border", "none"),
                ("z-index", "2147483647"),
                ("color-scheme", "normal"),
            ],
        );
        let parent: web_sys::Node = match document.body() {
            Some(body) => body.into(),
            None => document
                .document_element()
                .ok_or_else(|| JsValue::from_str("document has no root element"))?
                .into(),
        };
        parent.append_child(&overlay)?;
        parent.append_child(&frame)?;
        Ok(IframeSurface { frame, overlay })
    }

    /// The frame's window, once attached.
    pub fn content_window(&self) -> Option<Window> {
        self.frame.content_window()
    }
}

impl SurfaceView for IframeSurface {
    fn apply_rect(&self, rect: &VisualState) {
        let frame: &HtmlElement = self.frame.as_ref();
        let px = |v: f64| format!("{v}px");
        let (top, right, width, height) =
            (px(rect.top), px(rect.right), px(rect.width), px(rect.height));
        set_styles(
            frame,
            &[
                ("top", top.as_str()),
                ("right", right.as_str()),
                ("width", width.as_str()),
                ("height", height.as_str()),
            ],
        );
    }

    fn set_overlay(&self, visible: bool) {
        set_styles(
            &self.overlay,
            &[("display", if visible { "block" } else { "none" })],
        );
    }
}

/// `localStorage`.
#[derive(Debug, Clone)]
pub struct LocalStorageStore {
    storage: web_sys::Storage,
}

impl LocalStorageStore {
    /// The local storage of `window`.
    pub fn new(window: &Window) -> Result<Self, StoreError> {
        match window.local_storage() {
            Ok(Some(storage)) => Ok(LocalStorageStore { storage }),
            Ok(None) => Err(StoreError::Unavailable("no localStorage".into())),
            Err(e) => Err(StoreError::Unavailable(js_error(&e))),
        }
    }
}

impl VisualStore for LocalStorageStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.storage
            .get_item(key)
            .map_err(|e| StoreError::Unavailable(js_error(&e)))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.storage
            .set_item(key, value)
            .map_err(|e| StoreError::Unavailable(js_error(&e)))
    }
}

/// A store that keeps nothing, for pages where storage is blocked.
#[derive(Debug, Clone, Copy)]
struct NoStore;

impl VisualStore for NoStore {
    fn read(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn write(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("no localStorage".into()))
    }
}

/// Next tick via `setTimeout(task, 0)`.
#[derive(Debug, Clone)]
pub struct TimeoutScheduler {
    window: Window,
}

impl TimeoutScheduler {
    /// A scheduler on `window`'s event loop.
    pub fn new(window: Window) -> Self {
        TimeoutScheduler { window }
    }
}

impl Scheduler for TimeoutScheduler {
    fn next_tick(&self, task: Task) {
        let callback = Closure::once_into_js(move || task());
        if let Err(e) = self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), 0)
        {
            logwise::error_sync!(
                "TimeoutScheduler: setTimeout failed: {e}",
                e = logwise::privacy::LogIt(&js_error(&e))
            );
        }
    }
}

/// A competitor's EIP-1193 provider object.
#[derive(Debug, Clone)]
pub struct JsProvider {
    object: JsValue,
}

impl JsProvider {
    /// Wraps a JS provider object.
    pub fn new(object: JsValue) -> Self {
        JsProvider { object }
    }

    fn method(&self, name: &str) -> Result<Function, ProviderRpcError> {
        Reflect::get(&self.object, &JsValue::from_str(name))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
            .ok_or_else(|| ProviderRpcError::internal_error(format!("provider has no {name}()")))
    }
}

/// Reads an EIP-1193 error thrown or rejected by a JS provider.
fn rpc_error(e: &JsValue) -> ProviderRpcError {
    let code = Reflect::get(e, &"code".into())
        .ok()
        .and_then(|c| c.as_f64())
        .map(|c| c as i32)
        .unwrap_or(-32603);
    let message = Reflect::get(e, &"message".into())
        .ok()
        .and_then(|m| m.as_string())
        .unwrap_or_else(|| js_error(e));
    let data = Reflect::get(e, &"data".into())
        .ok()
        .filter(|d| !d.is_undefined())
        .map(|d| from_js(&d));
    ProviderRpcError::new(code, message, data)
}

fn provider_event(name: EventName, payload: &JsValue) -> ProviderEvent {
    let value = from_js(payload);
    match name {
        EventName::Connect => ProviderEvent::Connect {
            chain_id: value["chainId"].as_str().unwrap_or_default().to_owned(),
        },
        EventName::Disconnect => ProviderEvent::Disconnect(rpc_error(payload)),
        EventName::AccountsChanged => ProviderEvent::AccountsChanged(
            serde_json::from_value(value).unwrap_or_default(),
        ),
        EventName::ChainChanged => {
            ProviderEvent::ChainChanged(value.as_str().unwrap_or_default().to_owned())
        }
        EventName::Message => ProviderEvent::Message {
            kind: value["type"].as_str().unwrap_or_default().to_owned(),
            data: value["data"].clone(),
        },
    }
}

impl Eip1193Provider for JsProvider {
    fn request(&self, args: RequestArguments, responder: Responder) {
        let request = match self.method("request") {
            Ok(request) => request,
            Err(e) => {
                responder.reject(e);
                return;
            }
        };
        let returned = match request.call1(&self.object, &to_js(&args)) {
            Ok(returned) => returned,
            Err(e) => {
                responder.reject(rpc_error(&e));
                return;
            }
        };
        let promise = Promise::resolve(&returned);
        wasm_bindgen_futures::spawn_local(async move {
            match wasm_bindgen_futures::JsFuture::from(promise).await {
                Ok(value) => responder.resolve(from_js(&value)),
                Err(e) => responder.reject(rpc_error(&e)),
            };
        });
    }

    fn subscribe(&self, sink: EventSink) {
        let on = match self.method("on") {
            Ok(on) => on,
            Err(e) => {
                logwise::warn_sync!(
                    "JsProvider: cannot subscribe: {e}",
                    e = logwise::privacy::LogIt(&e)
                );
                return;
            }
        };
        for name in [
            EventName::Connect,
            EventName::Disconnect,
            EventName::AccountsChanged,
            EventName::ChainChanged,
            EventName::Message,
        ] {
            let sink = sink.clone();
            let callback = Closure::wrap(Box::new(move |payload: JsValue| {
                sink(provider_event(name, &payload));
            }) as Box<dyn Fn(JsValue)>);
            if let Err(e) = on.call2(
                &self.object,
                &JsValue::from_str(name.as_str()),
                callback.as_ref().unchecked_ref(),
            ) {
                logwise::warn_sync!(
                    "JsProvider: on({name}) failed: {e}",
                    name = logwise::privacy::LogIt(&name),
                    e = logwise::privacy::LogIt(&js_error(&e))
                );
            }
            callback.forget(); //leak the closure
        }
    }

    fn name(&self) -> Option<String> {
        [
            ("isMetaMask", "MetaMask"),
            ("isCoinbaseWallet", "Coinbase Wallet"),
            ("isRabby", "Rabby"),
            ("isBraveWallet", "Brave Wallet"),
        ]
        .into_iter()
        .find(|(flag, _)| {
            Reflect::get(&self.object, &JsValue::from_str(flag))
                .ok()
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        })
        .map(|(_, name)| name.to_owned())
    }
}

/// `window.ethereum`, accessed through `Reflect`.
#[derive(Debug, Clone)]
pub struct ReflectGlobal {
    window: Window,
    own: JsValue,
}

impl ReflectGlobal {
    /// The handle on `window`, to be filled with `own`.
    pub fn new(window: Window, own: JsValue) -> Self {
        ReflectGlobal { window, own }
    }

    fn key() -> JsValue {
        JsValue::from_str(WALLET_GLOBAL)
    }

    fn host_error(e: JsValue) -> crate::global::Error {
        crate::global::Error::Host(js_error(&e))
    }
}

impl WalletGlobal for ReflectGlobal {
    fn slot_state(&self) -> SlotState {
        let descriptor = match Reflect::get_own_property_descriptor(&self.window, &Self::key()) {
            Ok(descriptor) if !descriptor.is_undefined() => descriptor,
            _ => return SlotState::Vacant,
        };
        let configurable = Reflect::get(&descriptor, &"configurable".into())
            .ok()
            .and_then(|c| c.as_bool())
            .unwrap_or(false);
        if configurable {
            SlotState::Configurable
        } else {
            SlotState::Locked
        }
    }

    fn existing(&self) -> Option<Rc<dyn Eip1193Provider>> {
        let value = Reflect::get(&self.window, &Self::key()).ok()?;
        if value.is_undefined() || value.is_null() || value == self.own {
            return None;
        }
        Some(Rc::new(JsProvider::new(value)))
    }

    fn define_accessor(&self, on_assign: AssignHook) -> Result<(), crate::global::Error> {
        let own = self.own.clone();
        let getter = Closure::wrap(Box::new(move || own.clone()) as Box<dyn Fn() -> JsValue>);
        let setter = Closure::wrap(Box::new(move |value: JsValue| {
            on_assign(Rc::new(JsProvider::new(value)));
        }) as Box<dyn Fn(JsValue)>);

        let descriptor = Object::new();
        Reflect::set(&descriptor, &"get".into(), &getter.into_js_value()).map_err(Self::host_error)?;
        Reflect::set(&descriptor, &"set".into(), &setter.into_js_value()).map_err(Self::host_error)?;
        Reflect::set(&descriptor, &"configurable".into(), &JsValue::TRUE).map_err(Self::host_error)?;
        Reflect::set(&descriptor, &"enumerable".into(), &JsValue::TRUE).map_err(Self::host_error)?;

        match Reflect::define_property(&self.window, &Self::key(), &descriptor) {
            Ok(true) => Ok(()),
            Ok(false) => Err(crate::global::Error::Locked),
            Err(e) => Err(Self::host_error(e)),
        }
    }

    fn assign(&self) -> Result<(), crate::global::Error> {
        match Reflect::set(&self.window, &Self::key(), &self.own) {
            Ok(true) => Ok(()),
            Ok(false) => Err(crate::global::Error::ReadOnly),
            Err(e) => Err(Self::host_error(e)),
        }
    }
}

/// EIP-6963 events on `window`.
#[derive(Debug, Clone)]
pub struct WindowDiscovery {
    window: Window,
}

impl WindowDiscovery {
    /// Discovery on `window`.
    pub fn new(window: Window) -> Self {
        WindowDiscovery { window }
    }
}

impl DiscoveryTarget<JsValue> for WindowDiscovery {
    fn dispatch_announce(&self, detail: &Rc<ProviderDetail<JsValue>>) -> Result<(), crate::eip6963::Error> {
        let dispatch = |e: JsValue| crate::eip6963::Error::Dispatch(js_error(&e));
        let payload = Object::new();
        Reflect::set(&payload, &"info".into(), &Object::freeze(&to_js(detail.info()).unchecked_into()))
            .map_err(dispatch)?;
        Reflect::set(&payload, &"provider".into(), detail.provider()).map_err(dispatch)?;
        let init = web_sys::CustomEventInit::new();
        init.set_detail(&Object::freeze(&payload));
        let event = web_sys::CustomEvent::new_with_event_init_dict(ANNOUNCE_EVENT, &init).map_err(dispatch)?;
        self.window.dispatch_event(&event).map_err(dispatch)?;
        Ok(())
    }

    fn on_request(&self, listener: Box<dyn Fn()>) {
        let callback = Closure::wrap(Box::new(move |_event: web_sys::Event| listener())
            as Box<dyn Fn(web_sys::Event)>);
        if let Err(e) = self
            .window
            .add_event_listener_with_callback(REQUEST_EVENT, callback.as_ref().unchecked_ref())
        {
            logwise::error_sync!(
                "WindowDiscovery: cannot listen: {e}",
                e = logwise::privacy::LogIt(&js_error(&e))
            );
        }
        callback.forget(); //leak the closure
    }
}

/// The provider object dApps receive.
#[wasm_bindgen]
pub struct WalletProvider {
    wallet: Rc<OnceCell<InjectedWallet<JsValue>>>,
    listeners: RefCell<Vec<(EventName, Function, SubscriptionId)>>,
}

#[wasm_bindgen]
impl WalletProvider {
    /// EIP-1193 `request({ method, params })`.
    pub fn request(&self, args: JsValue) -> Promise {
        let Some(wallet) = self.wallet.get() else {
            return Promise::reject(&to_js(&ProviderRpcError::disconnected(
                "The wallet is still loading.",
            )));
        };
        let args: RequestArguments = match serde_json::from_value(from_js(&args)) {
            Ok(args) => args,
            Err(e) => {
                return Promise::reject(&to_js(&ProviderRpcError::invalid_request(e.to_string())));
            }
        };
        let deferred = wallet.request(args);
        wasm_bindgen_futures::future_to_promise(async move {
            match deferred.await {
                Ok(value) => Ok(to_js(&value)),
                Err(e) => Err(to_js(&e)),
            }
        })
    }

    /// EIP-1193 `on(event, handler)`.
    ///
    /// Never throws: events this wallet does not emit, such as the legacy
    /// `networkChanged`, are accepted and never fire.
    pub fn on(&self, event: String, handler: Function) {
        let name: EventName = match event.parse() {
            Ok(name) => name,
            Err(e) => {
                logwise::warn_sync!(
                    "WalletProvider: ignoring subscription: {e}",
                    e = logwise::privacy::LogIt(&e)
                );
                return;
            }
        };
        let Some(wallet) = self.wallet.get() else {
            logwise::warn_sync!(
                "WalletProvider: ignoring {name} subscription before injection finished",
                name = logwise::privacy::LogIt(&name)
            );
            return;
        };
        let callback = handler.clone();
        let id = wallet.on(
            name,
            Rc::new(move |event: &ProviderEvent| {
                if let Err(e) = callback.call1(&JsValue::NULL, &to_js(&event.payload())) {
                    logwise::warn_sync!(
                        "WalletProvider: listener threw: {e}",
                        e = logwise::privacy::LogIt(&js_error(&e))
                    );
                }
            }),
        );
        self.listeners.borrow_mut().push((name, handler, id));
    }

    /// EIP-1193 `removeListener(event, handler)`.
    #[wasm_bindgen(js_name = removeListener)]
    pub fn remove_listener(&self, event: String, handler: Function) -> bool {
        let Ok(name) = event.parse::<EventName>() else {
            return false;
        };
        let Some(wallet) = self.wallet.get() else {
            return false;
        };
        let mut listeners = self.listeners.borrow_mut();
        match listeners
            .iter()
            .position(|(n, f, _)| *n == name && *f == handler)
        {
            Some(index) => {
                let (_, _, id) = listeners.remove(index);
                wallet.remove_listener(id)
            }
            None => false,
        }
    }

    /// Whether an account is exposed.
    #[wasm_bindgen(js_name = isConnected)]
    pub fn is_connected(&self) -> bool {
        self.wallet.get().is_some_and(|w| w.is_connected())
    }

    /// The exposed account.
    #[wasm_bindgen(getter, js_name = selectedAddress)]
    pub fn selected_address(&self) -> Option<String> {
        self.wallet.get().and_then(|w| w.selected_address())
    }

    /// The exposed chain.
    #[wasm_bindgen(getter, js_name = chainId)]
    pub fn chain_id(&self) -> Option<String> {
        self.wallet.get().and_then(|w| w.chain_id())
    }
}

/// Injects the page provider. Runs in the page's own script context.
#[wasm_bindgen]
pub fn inject_page_provider(config_json: Option<String>) -> Result<(), JsValue> {
    let config = config_from(config_json)?;
    let window = window()?;
    let cell = Rc::new(OnceCell::new());
    let handle = JsValue::from(WalletProvider {
        wallet: cell.clone(),
        listeners: RefCell::new(Vec::new()),
    });
    let wallet = InjectedWallet::install(
        &config,
        PageHost {
            handle: handle.clone(),
            bus: Rc::new(PostMessageBus::new(window.clone(), &config.channel)),
            scheduler: Rc::new(TimeoutScheduler::new(window.clone())),
            global: Rc::new(ReflectGlobal::new(window.clone(), handle)),
            discovery: Rc::new(WindowDiscovery::new(window.clone())),
            diagnostics: Rc::new(LogDiagnostics),
        },
    )
    .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let period = wallet.eviction_period();
    if cell.set(wallet).is_err() {
        logwise::error_sync!("inject_page_provider: wallet was already injected");
        return Ok(());
    }
    // the handle forwards to the cell, so announce only once it is filled
    if let Some(wallet) = cell.get() {
        wallet.announce();
    }
    if let Some(period) = period {
        start_eviction(&window, cell, period)?;
    }
    Ok(())
}

/// Sweeps timed-out requests every `period`.
fn start_eviction(
    window: &Window,
    cell: Rc<OnceCell<InjectedWallet<JsValue>>>,
    period: crate::sys::time::Duration,
) -> Result<(), JsValue> {
    let sweep = Closure::wrap(Box::new(move || {
        if let Some(wallet) = cell.get() {
            wallet.evict_stale(crate::sys::time::Instant::now());
        }
    }) as Box<dyn Fn()>);
    let millis = i32::try_from(period.as_millis()).unwrap_or(i32::MAX);
    window.set_interval_with_callback_and_timeout_and_arguments_0(
        sweep.as_ref().unchecked_ref(),
        millis,
    )?;
    sweep.forget(); //leak the closure
    Ok(())
}

/// Mounts the embedded surface and starts the bridge. Runs in the isolated
/// script context.
#[wasm_bindgen]
pub fn start_context_bridge(config_json: Option<String>) -> Result<(), JsValue> {
    let config = config_from(config_json)?;
    let window = window()?;
    let document = window
        .document()
        .ok_or_else(|| JsValue::from_str("no document"))?;
    let hostname = window.location().hostname()?;
    let url = crate::bridge::surface_url(&config, &hostname)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    let surface = IframeSurface::mount(&document, &url)?;
    let mounted = surface
        .content_window()
        .ok_or_else(|| JsValue::from_str("surface frame has no window"))?;
    let store: Rc<dyn VisualStore> = match LocalStorageStore::new(&window) {
        Ok(store) => Rc::new(store),
        Err(e) => {
            logwise::warn_sync!(
                "start_context_bridge: surface position will not persist: {e}",
                e = logwise::privacy::LogIt(&e)
            );
            Rc::new(NoStore)
        }
    };
    let host = BridgeHost {
        bus: Rc::new(PostMessageBus::new(window.clone(), &config.channel)),
        channel: Rc::new(FrameChannel::new(&url)),
        view: Rc::new(surface),
        store,
    };
    let bridge = Rc::new(ContextBridge::new(config, host, mounted, viewport(&window)));
    bridge.listen();

    let frames = bridge.clone();
    let own_window = window.clone();
    let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
        let Some(source) = event.source() else {
            return;
        };
        if JsValue::from(source.clone()) == JsValue::from(own_window.clone()) {
            return;
        }
        let Some(raw) = event.data().as_string() else {
            return;
        };
        // cross-origin window proxies fail instanceof checks
        let source: Window = source.unchecked_into();
        let _ = frames.on_window_message(&source, &raw);
    }) as Box<dyn FnMut(_)>);
    window.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
    on_message.forget(); //leak the closure

    let resized = bridge.clone();
    let resize_window = window.clone();
    let on_resize = Closure::wrap(Box::new(move |_event: web_sys::Event| {
        if let Err(e) = resized.on_viewport_change(viewport(&resize_window)) {
            logwise::warn_sync!(
                "start_context_bridge: {e}",
                e = logwise::privacy::LogIt(&e)
            );
        }
    }) as Box<dyn FnMut(_)>);
    window.add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref())?;
    on_resize.forget(); //leak the closure
    Ok(())
}
