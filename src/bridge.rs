//! The context bridge between the page and the embedded surface.
//!
//! The bridge runs in the isolated script context attached to the page. It
//! can see the DOM but not the page's variables, so it talks to the page
//! provider over the broadcast bus and to the embedded surface (a frame loaded
//! from the extension's origin) over cross-window messages.
//!
//! ```text
//!             bus                              frame channel
//!  provider ───────> on_bus_message ──> MessageBuffer ──(ready)──> surface
//!  provider <─────── re-post verbatim <── Handshake::authenticate <── surface
//!                                   └──> drag / resize ──> VisualState ──> store
//! ```
//!
//! The bridge
//!
//! - authenticates the surface with a token handshake ([`handshake`]),
//! - buffers page traffic until the surface reports `ready` ([`buffer`]),
//! - keeps the surface inside the viewport and persists its rectangle once a
//!   gesture settles ([`visual`]),
//! - forwards page→UI kinds to the surface and re-broadcasts UI→page kinds
//!   unchanged.
//!
//! Everything the bridge touches in the host (the frame, its style, storage,
//! the bus) is behind a trait, so the whole flow runs in tests with in-memory
//! collaborators.

pub mod buffer;
pub mod handshake;
pub mod visual;

use crate::bus::BroadcastBus;
use crate::config::RelayConfig;
use crate::messages::{ChannelFrame, RelayMessage, Route};
use buffer::{Admission, MessageBuffer};
use handshake::{Handshake, HandshakeId, Rejection};
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;
use visual::{GesturePhase, StoreError, Viewport, VisualState, VisualStore};

/// Error type for bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame or message could not be decoded or encoded.
    #[error(transparent)]
    Message(#[from] crate::messages::Error),
    /// Traffic from a window or token that did not complete the handshake.
    #[error("unauthenticated surface traffic: {0}")]
    Unauthenticated(#[from] Rejection),
    /// A message arrived on a channel its kind never travels.
    #[error("{kind} is not accepted from {from}")]
    Misrouted {
        /// Kind of the message
        kind: &'static str,
        /// Where it came from
        from: &'static str,
    },
    /// The surface window could not be reached.
    #[error("cannot reach the surface: {0}")]
    Channel(String),
    /// The bus refused a message.
    #[error(transparent)]
    Bus(#[from] crate::bus::Error),
    /// The rectangle could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The surface location is not a URL.
    #[error("invalid surface URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Sends frames to a window.
pub trait SurfaceChannel<W>: Debug {
    /// Posts `frame` to `target`.
    fn post(&self, target: &W, frame: &ChannelFrame) -> Result<(), Error>;
}

/// The surface's on-screen presentation.
pub trait SurfaceView: Debug {
    /// Positions and sizes the surface.
    fn apply_rect(&self, rect: &VisualState);
    /// Shows or hides the dimming overlay beneath the surface.
    fn set_overlay(&self, visible: bool);
}

/// The host collaborators a bridge needs.
#[derive(Debug)]
pub struct BridgeHost<W> {
    /// The page-wide bus
    pub bus: Rc<dyn BroadcastBus>,
    /// Frame messaging
    pub channel: Rc<dyn SurfaceChannel<W>>,
    /// The surface element
    pub view: Rc<dyn SurfaceView>,
    /// Durable storage for the rectangle
    pub store: Rc<dyn VisualStore>,
}

/// Builds the surface location for a page on `hostname`.
///
/// ```
/// use wallet_relay::bridge::surface_url;
/// use wallet_relay::config::RelayConfig;
///
/// let url = surface_url(&RelayConfig::default(), "app.example.org").unwrap();
/// assert_eq!(
///     url.as_str(),
///     "chrome-extension://wallet/surface.html?hostname=app.example.org&surface=dapp"
/// );
/// ```
pub fn surface_url(config: &RelayConfig, hostname: &str) -> Result<url::Url, Error> {
    let mut url = url::Url::parse(&config.surface_url)?;
    url.query_pairs_mut()
        .append_pair("hostname", hostname)
        .append_pair("surface", &config.surface_tag);
    Ok(url)
}

/// The bridge for one embedded surface.
///
/// `W` identifies a window: a `web_sys::Window` in the browser, anything
/// comparable in tests.
#[derive(Debug)]
pub struct ContextBridge<W> {
    config: RelayConfig,
    host: BridgeHost<W>,
    mounted: W,
    handshake: RefCell<Handshake<W>>,
    buffer: RefCell<MessageBuffer>,
    visual: Cell<VisualState>,
    viewport: Cell<Viewport>,
    overlay: Cell<bool>,
}

impl<W: Clone + PartialEq + Debug + 'static> ContextBridge<W> {
    /// Creates the bridge for the surface frame whose window is `mounted`.
    ///
    /// The persisted rectangle is restored and clamped into `viewport`; if
    /// there is none, or it cannot be read, the configured default is used.
    pub fn new(config: RelayConfig, host: BridgeHost<W>, mounted: W, viewport: Viewport) -> Self {
        let stored = match visual::load(&*host.store, &config.storage_key) {
            Ok(stored) => stored.filter(is_usable),
            Err(e) => {
                logwise::warn_sync!(
                    "ContextBridge: ignoring persisted rectangle: {e}",
                    e = logwise::privacy::LogIt(&e)
                );
                None
            }
        };
        let rect = stored
            .unwrap_or(config.default_rect)
            .clamped(viewport, config.margin);
        host.view.apply_rect(&rect);
        ContextBridge {
            config,
            host,
            mounted,
            handshake: RefCell::new(Handshake::new()),
            buffer: RefCell::new(MessageBuffer::new()),
            visual: Cell::new(rect),
            viewport: Cell::new(viewport),
            overlay: Cell::new(false),
        }
    }

    /// Starts receiving bus traffic.
    pub fn listen(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.host.bus.subscribe(Rc::new(move |message: &RelayMessage| {
            if let Some(bridge) = weak.upgrade() {
                if let Err(e) = bridge.on_bus_message(message) {
                    logwise::warn_sync!(
                        "ContextBridge: could not forward {kind}: {e}",
                        kind = logwise::privacy::LogIt(&message.kind()),
                        e = logwise::privacy::LogIt(&e)
                    );
                }
            }
        }));
    }

    /// This bridge's handshake id.
    pub fn parent_id(&self) -> HandshakeId {
        self.handshake.borrow().parent_id()
    }

    /// Whether a surface holds a token pair.
    pub fn is_authenticated(&self) -> bool {
        self.handshake.borrow().is_authenticated()
    }

    /// Whether the surface reported `ready` and traffic is sent directly.
    pub fn is_ready(&self) -> bool {
        self.buffer.borrow().is_open()
    }

    /// Number of messages held back until `ready`.
    pub fn buffered(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// The surface's current rectangle.
    pub fn visual_state(&self) -> VisualState {
        self.visual.get()
    }

    /// Whether the dimming overlay is shown.
    pub fn overlay_visible(&self) -> bool {
        self.overlay.get()
    }

    /// Handles a message seen on the bus.
    ///
    /// Page→UI kinds are forwarded to the surface, or buffered until it is
    /// ready. Every other kind is ignored.
    pub fn on_bus_message(&self, message: &RelayMessage) -> Result<(), Error> {
        if message.route() != Route::PageToUi {
            return Ok(());
        }
        let admission = self.buffer.borrow_mut().admit(message.clone());
        match admission {
            Admission::Buffered => Ok(()),
            Admission::Send(message) => self.send_to_surface(message),
        }
    }

    /// Handles a raw cross-window message from `source`.
    ///
    /// Anything that is not a well-formed frame, or that fails authentication,
    /// is dropped and the reason returned (and logged).
    pub fn on_window_message(&self, source: &W, raw: &str) -> Result<(), Error> {
        let result = ChannelFrame::parse(raw)
            .map_err(Error::from)
            .and_then(|frame| self.on_frame(source, frame));
        if let Err(e) = &result {
            logwise::warn_sync!(
                "ContextBridge: dropped window message: {e}",
                e = logwise::privacy::LogIt(e)
            );
        }
        result
    }

    fn on_frame(&self, source: &W, frame: ChannelFrame) -> Result<(), Error> {
        match frame {
            ChannelFrame::Probe { child_id } => {
                let token = self
                    .handshake
                    .borrow_mut()
                    .on_probe(source, &self.mounted, child_id)?;
                {
                    let mut buffer = self.buffer.borrow_mut();
                    // a reloaded surface must report ready again
                    if buffer.is_open() {
                        buffer.close();
                    }
                }
                logwise::info_sync!(
                    "ContextBridge: surface {child} authenticated",
                    child = logwise::privacy::LogIt(&child_id)
                );
                self.host.channel.post(
                    source,
                    &ChannelFrame::Welcome {
                        parent_id: token.parent_id,
                        child_id: token.child_id,
                    },
                )
            }
            ChannelFrame::Welcome { .. } => Err(Error::Misrouted {
                kind: "welcome",
                from: "a window",
            }),
            ChannelFrame::Envelope {
                parent_id,
                child_id,
                message,
            } => {
                self.handshake
                    .borrow()
                    .authenticate(source, parent_id, child_id)?;
                self.on_surface_message(message)
            }
        }
    }

    fn on_surface_message(&self, message: RelayMessage) -> Result<(), Error> {
        match message.route() {
            Route::UiToPage => Ok(self.host.bus.post(&message)?),
            Route::UiToBridge => {
                match message {
                    RelayMessage::Ready => self.flush(),
                    RelayMessage::Drag { dx, dy, phase } => self.drag(dx, dy, phase),
                    RelayMessage::Resize { size } => self.resize(size),
                    _ => Ok(()),
                }
            }
            Route::PageToUi => Err(Error::Misrouted {
                kind: message.kind(),
                from: "the surface",
            }),
        }
    }

    fn send_to_surface(&self, message: RelayMessage) -> Result<(), Error> {
        let (window, token) = {
            let handshake = self.handshake.borrow();
            match (handshake.window().cloned(), handshake.token()) {
                (Some(window), Some(token)) => (window, token),
                _ => return Err(Rejection::NotAuthenticated.into()),
            }
        };
        self.host.channel.post(
            &window,
            &ChannelFrame::Envelope {
                parent_id: token.parent_id,
                child_id: token.child_id,
                message,
            },
        )
    }

    fn flush(&self) -> Result<(), Error> {
        let queued = self.buffer.borrow_mut().open();
        let count = queued.len();
        for message in queued {
            if let Err(e) = self.send_to_surface(message) {
                logwise::error_sync!(
                    "ContextBridge: lost buffered message: {e}",
                    e = logwise::privacy::LogIt(&e)
                );
            }
        }
        logwise::info_sync!(
            "ContextBridge: surface ready, flushed {count} messages",
            count = logwise::privacy::LogIt(&count)
        );
        Ok(())
    }

    fn drag(&self, dx: f64, dy: f64, phase: GesturePhase) -> Result<(), Error> {
        let rect = self
            .visual
            .get()
            .dragged(dx, dy, self.viewport.get(), self.config.margin);
        self.apply(rect);
        match phase {
            GesturePhase::Move => Ok(()),
            GesturePhase::End => self.persist(),
        }
    }

    fn resize(&self, size: visual::SurfaceSize) -> Result<(), Error> {
        let rect = self.visual.get().resized(
            self.config.sizes.get(size),
            self.viewport.get(),
            self.config.margin,
        );
        self.apply(rect);
        let overlay = size.has_overlay();
        if overlay != self.overlay.replace(overlay) {
            self.host.view.set_overlay(overlay);
        }
        self.persist()
    }

    /// Re-clamps the surface into a resized viewport, persisting if it moved.
    pub fn on_viewport_change(&self, viewport: Viewport) -> Result<(), Error> {
        self.viewport.set(viewport);
        let rect = self.visual.get().clamped(viewport, self.config.margin);
        if rect == self.visual.get() {
            return Ok(());
        }
        self.apply(rect);
        self.persist()
    }

    /// Forgets the surface: drops its token pair and any buffered traffic,
    /// hides the overlay, and waits for a new handshake.
    pub fn teardown(&self) {
        self.handshake.borrow_mut().reset();
        self.buffer.borrow_mut().close();
        if self.overlay.replace(false) {
            self.host.view.set_overlay(false);
        }
        logwise::info_sync!("ContextBridge: surface torn down");
    }

    /// The surface location for a page on `hostname`.
    pub fn surface_url(&self, hostname: &str) -> Result<url::Url, Error> {
        surface_url(&self.config, hostname)
    }

    fn apply(&self, rect: VisualState) {
        self.visual.set(rect);
        self.host.view.apply_rect(&rect);
    }

    fn persist(&self) -> Result<(), Error> {
        visual::save(&*self.host.store, &self.config.storage_key, &self.visual.get())?;
        Ok(())
    }
}

fn is_usable(rect: &VisualState) -> bool {
    rect.top.is_finite() && rect.right.is_finite() && rect.width > 0.0 && rect.height > 0.0
}

/// In-memory host collaborators for driving a bridge without a browser.
pub mod memory {
    use super::{Error, SurfaceChannel, SurfaceView};
    use crate::messages::ChannelFrame;
    use crate::bridge::visual::VisualState;
    use std::cell::RefCell;
    use std::fmt::Debug;
    use std::rc::Rc;

    /// Records every frame posted, with its target. Clones share the log.
    #[derive(Debug, Clone)]
    pub struct RecordingChannel<W> {
        sent: Rc<RefCell<Vec<(W, ChannelFrame)>>>,
    }

    impl<W> Default for RecordingChannel<W> {
        fn default() -> Self {
            RecordingChannel {
                sent: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl<W: Clone> RecordingChannel<W> {
        /// Creates an empty log.
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything posted so far.
        pub fn sent(&self) -> Vec<(W, ChannelFrame)> {
            self.sent.borrow().clone()
        }

        /// Removes and returns everything posted so far.
        pub fn take(&self) -> Vec<(W, ChannelFrame)> {
            std::mem::take(&mut *self.sent.borrow_mut())
        }
    }

    impl<W: Clone + Debug> SurfaceChannel<W> for RecordingChannel<W> {
        fn post(&self, target: &W, frame: &ChannelFrame) -> Result<(), Error> {
            self.sent.borrow_mut().push((target.clone(), frame.clone()));
            Ok(())
        }
    }

    /// Records the last applied rectangle and the overlay. Clones share state.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingView {
        rect: Rc<RefCell<Option<VisualState>>>,
        overlay: Rc<RefCell<bool>>,
    }

    impl RecordingView {
        /// Creates a view with nothing applied.
        pub fn new() -> Self {
            Self::default()
        }

        /// The last applied rectangle.
        pub fn rect(&self) -> Option<VisualState> {
            *self.rect.borrow()
        }

        /// Whether the overlay is shown.
        pub fn overlay(&self) -> bool {
            *self.overlay.borrow()
        }
    }

    impl SurfaceView for RecordingView {
        fn apply_rect(&self, rect: &VisualState) {
            *self.rect.borrow_mut() = Some(*rect);
        }

        fn set_overlay(&self, visible: bool) {
            *self.overlay.borrow_mut() = visible;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{RecordingChannel, RecordingView};
    use super::*;
    use crate::bus::LocalBus;
    use crate::correlation::CorrelationId;
    use visual::{MemoryStore, SurfaceSize};

    const FRAME: u32 = 1;
    const STRANGER: u32 = 2;

    struct Fixture {
        bus: LocalBus,
        channel: RecordingChannel<u32>,
        view: RecordingView,
        store: MemoryStore,
        bridge: ContextBridge<u32>,
    }

    fn fixture_with(store: MemoryStore) -> Fixture {
        let bus = LocalBus::new();
        let channel = RecordingChannel::new();
        let view = RecordingView::new();
        let host = BridgeHost {
            bus: Rc::new(bus.clone()),
            channel: Rc::new(channel.clone()),
            view: Rc::new(view.clone()),
            store: Rc::new(store.clone()),
        };
        let bridge = ContextBridge::new(
            RelayConfig::default(),
            host,
            FRAME,
            Viewport::new(1280.0, 800.0),
        );
        Fixture {
            bus,
            channel,
            view,
            store,
            bridge,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryStore::new())
    }

    fn handshake(f: &Fixture) -> (HandshakeId, HandshakeId) {
        let child = HandshakeId::new();
        let probe = ChannelFrame::Probe { child_id: child }.encode().unwrap();
        f.bridge.on_window_message(&FRAME, &probe).unwrap();
        (f.bridge.parent_id(), child)
    }

    fn envelope(ids: (HandshakeId, HandshakeId), message: RelayMessage) -> String {
        ChannelFrame::Envelope {
            parent_id: ids.0,
            child_id: ids.1,
            message,
        }
        .encode()
        .unwrap()
    }

    fn request(method: &str) -> RelayMessage {
        RelayMessage::RpcRequest {
            id: CorrelationId::new(),
            method: method.to_owned(),
            params: None,
        }
    }

    #[test]
    fn probe_is_answered_with_a_welcome() {
        let f = fixture();
        let (parent, child) = handshake(&f);
        assert_eq!(
            f.channel.sent(),
            vec![(FRAME, ChannelFrame::Welcome { parent_id: parent, child_id: child })]
        );
        assert!(f.bridge.is_authenticated());
    }

    #[test]
    fn probe_from_a_stranger_is_refused() {
        let f = fixture();
        let probe = ChannelFrame::Probe { child_id: HandshakeId::new() }.encode().unwrap();
        assert!(matches!(
            f.bridge.on_window_message(&STRANGER, &probe),
            Err(Error::Unauthenticated(Rejection::ForeignProbe))
        ));
        assert!(f.channel.sent().is_empty());
    }

    #[test]
    fn page_traffic_waits_for_ready_then_flushes_in_order() {
        let f = fixture();
        let ids = handshake(&f);
        f.channel.take();

        let sent = vec![request("eth_requestAccounts"), request("eth_chainId")];
        for message in &sent {
            f.bridge.on_bus_message(message).unwrap();
        }
        assert!(f.channel.sent().is_empty());
        assert_eq!(f.bridge.buffered(), 2);

        f.bridge.on_window_message(&FRAME, &envelope(ids, RelayMessage::Ready)).unwrap();
        let delivered: Vec<RelayMessage> = f
            .channel
            .take()
            .into_iter()
            .map(|(_, frame)| match frame {
                ChannelFrame::Envelope { message, .. } => message,
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(delivered, sent);

        // direct mode afterwards
        f.bridge.on_bus_message(&request("eth_accounts")).unwrap();
        assert_eq!(f.channel.sent().len(), 1);
    }

    #[test]
    fn ui_to_page_kinds_are_reposted_verbatim() {
        let f = fixture();
        let ids = handshake(&f);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        f.bus.subscribe(Rc::new(move |m: &RelayMessage| sink.borrow_mut().push(m.clone())));

        let answer = RelayMessage::response(CorrelationId::new(), Ok(serde_json::json!(["0xabc"])));
        f.bridge.on_window_message(&FRAME, &envelope(ids, answer.clone())).unwrap();
        f.bus.deliver_all();
        assert_eq!(*seen.borrow(), vec![answer]);
    }

    #[test]
    fn page_bound_kinds_from_the_surface_are_refused() {
        let f = fixture();
        let ids = handshake(&f);
        assert!(matches!(
            f.bridge.on_window_message(&FRAME, &envelope(ids, request("eth_sign"))),
            Err(Error::Misrouted { .. })
        ));
        assert_eq!(f.bus.posted(), 0);
    }

    #[test]
    fn envelopes_need_the_right_window_and_ids() {
        let f = fixture();
        let ids = handshake(&f);
        let answer = RelayMessage::AccountChange { accounts: vec![] };
        assert!(f.bridge.on_window_message(&STRANGER, &envelope(ids, answer.clone())).is_err());
        assert!(
            f.bridge
                .on_window_message(&FRAME, &envelope((ids.0, HandshakeId::new()), answer.clone()))
                .is_err()
        );
        assert_eq!(f.bus.posted(), 0);
        f.bridge.on_window_message(&FRAME, &envelope(ids, answer)).unwrap();
        assert_eq!(f.bus.posted(), 1);
    }

    #[test]
    fn malformed_window_messages_are_dropped() {
        let f = fixture();
        assert!(matches!(
            f.bridge.on_window_message(&FRAME, "{\"hello\": 1}"),
            Err(Error::Message(_))
        ));
    }

    #[test]
    fn reprobe_reenters_buffering() {
        let f = fixture();
        let ids = handshake(&f);
        f.bridge.on_window_message(&FRAME, &envelope(ids, RelayMessage::Ready)).unwrap();
        assert!(f.bridge.is_ready());

        let reloaded = handshake(&f);
        assert_ne!(reloaded.1, ids.1);
        assert!(!f.bridge.is_ready());
        f.bridge.on_bus_message(&request("eth_chainId")).unwrap();
        assert_eq!(f.bridge.buffered(), 1);
        // the old surface's token is dead
        assert!(f.bridge.on_window_message(&FRAME, &envelope(ids, RelayMessage::Ready)).is_err());
    }

    #[test]
    fn drag_persists_only_when_the_gesture_ends() {
        let f = fixture();
        let ids = handshake(&f);
        let start = f.bridge.visual_state();
        let drag = |dx: f64, phase| envelope(ids, RelayMessage::Drag { dx, dy: 10.0, phase });

        f.bridge.on_window_message(&FRAME, &drag(-5.0, GesturePhase::Move)).unwrap();
        f.bridge.on_window_message(&FRAME, &drag(-5.0, GesturePhase::Move)).unwrap();
        assert_eq!(f.store.write_count(), 0);
        f.bridge.on_window_message(&FRAME, &drag(0.0, GesturePhase::End)).unwrap();
        assert_eq!(f.store.write_count(), 1);

        let rect = f.bridge.visual_state();
        assert_eq!(rect.right, start.right + 10.0);
        assert_eq!(rect.top, start.top + 30.0);
        assert_eq!(f.view.rect(), Some(rect));
        assert_eq!(visual::load(&f.store, "wallet-relay:surface-rect").unwrap(), Some(rect));
    }

    #[test]
    fn modal_resize_toggles_the_overlay() {
        let f = fixture();
        let ids = handshake(&f);
        let resize = |size| envelope(ids, RelayMessage::Resize { size });

        f.bridge.on_window_message(&FRAME, &resize(SurfaceSize::Modal)).unwrap();
        assert!(f.view.overlay());
        assert_eq!(f.bridge.visual_state().width, 480.0);
        f.bridge.on_window_message(&FRAME, &resize(SurfaceSize::Compact)).unwrap();
        assert!(!f.view.overlay());
        assert_eq!(f.bridge.visual_state().height, 64.0);
        assert_eq!(f.store.write_count(), 2);
    }

    #[test]
    fn rehydrates_and_clamps_the_persisted_rectangle() {
        let store = MemoryStore::new();
        visual::save(&store, "wallet-relay:surface-rect", &VisualState::new(5000.0, 40.0, 360.0, 600.0))
            .unwrap();
        let f = fixture_with(store);
        let rect = f.bridge.visual_state();
        assert_eq!(rect.top, 800.0 - 600.0 - 16.0);
        assert_eq!(rect.right, 40.0);
        assert_eq!(f.view.rect(), Some(rect));
    }

    #[test]
    fn corrupt_persisted_rectangle_falls_back_to_default() {
        let store = MemoryStore::new();
        visual::VisualStore::write(&store, "wallet-relay:surface-rect", "{not json").unwrap();
        let f = fixture_with(store);
        assert_eq!(f.bridge.visual_state(), RelayConfig::default().default_rect);
    }

    #[test]
    fn shrinking_viewport_reclamps_and_persists() {
        let store = MemoryStore::new();
        visual::save(&store, "wallet-relay:surface-rect", &VisualState::new(150.0, 300.0, 360.0, 600.0))
            .unwrap();
        let f = fixture_with(store);
        let writes = f.store.write_count();

        f.bridge.on_viewport_change(Viewport::new(1280.0, 800.0)).unwrap();
        assert_eq!(f.store.write_count(), writes);

        f.bridge.on_viewport_change(Viewport::new(1280.0, 700.0)).unwrap();
        assert_eq!(f.bridge.visual_state().top, 700.0 - 600.0 - 16.0);
        assert_eq!(f.store.write_count(), writes + 1);

        f.bridge.on_viewport_change(Viewport::new(500.0, 700.0)).unwrap();
        assert_eq!(f.bridge.visual_state().right, 500.0 - 360.0 - 16.0);

        // too small to fit: pinned to the margin
        f.bridge.on_viewport_change(Viewport::new(300.0, 400.0)).unwrap();
        assert_eq!(f.bridge.visual_state().top, 16.0);
        assert_eq!(f.bridge.visual_state().right, 16.0);
    }

    #[test]
    fn teardown_forgets_the_surface() {
        let f = fixture();
        let ids = handshake(&f);
        f.bridge.on_window_message(&FRAME, &envelope(ids, RelayMessage::Resize { size: SurfaceSize::Modal })).unwrap();
        f.bridge.on_bus_message(&request("eth_chainId")).unwrap();

        f.bridge.teardown();
        assert!(!f.bridge.is_authenticated());
        assert_eq!(f.bridge.buffered(), 0);
        assert!(!f.view.overlay());
        assert!(f.bridge.on_window_message(&FRAME, &envelope(ids, RelayMessage::Ready)).is_err());
    }

    #[test]
    fn listening_bridge_forwards_bus_traffic() {
        let f = fixture();
        let bridge = Rc::new(f.bridge);
        bridge.listen();
        crate::bus::BroadcastBus::post(&f.bus, &request("eth_chainId")).unwrap();
        f.bus.deliver_all();
        assert_eq!(bridge.buffered(), 1);
    }
}
