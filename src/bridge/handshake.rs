//! Token-issuance handshake between the bridge and the embedded surface.
//!
//! The embedded surface proves which window it lives in before any UI-channel
//! traffic is accepted from it:
//!
//! ```text
//!  surface                                    bridge
//!    │  probe { childId }  ──(every ancestor)──>  │  source must be the mounted frame
//!    │  <──(direct reply)── welcome { parentId, childId }
//!    │                                            │  state: authenticated { childId, window }
//!    │  envelope { parentId, childId, message } ─>│  accepted iff window and both ids match
//! ```
//!
//! The bridge's `parentId` is minted once per bridge instance, the surface's
//! `childId` once per surface load. A probe from the same frame window after a
//! reload re-issues the pair with the new `childId`; probes from any other
//! window are refused, so a frame in another tab or one injected by the page
//! can never obtain a token pair for this bridge.

use std::fmt::{Display, Formatter};

/// One half of a handshake token pair.
///
/// # Examples
///
/// ```
/// use wallet_relay::bridge::handshake::HandshakeId;
///
/// assert_ne!(HandshakeId::new(), HandshakeId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct HandshakeId(uuid::Uuid);

impl HandshakeId {
    /// Mints a fresh random id.
    pub fn new() -> Self {
        HandshakeId(uuid::Uuid::new_v4())
    }
}

impl Default for HandshakeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for HandshakeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The `{ parentId, childId }` pair issued to one surface instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeToken {
    /// Issued by the bridge
    pub parent_id: HandshakeId,
    /// Generated by the surface
    pub child_id: HandshakeId,
}

/// Handshake state.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeState<W> {
    /// No surface has completed a probe yet
    AwaitingHandshake,
    /// A surface holds a token pair
    Authenticated {
        /// The surface's id
        child_id: HandshakeId,
        /// The window the probe came from; the only window later traffic is accepted from
        window: W,
    },
}

/// Why a probe or envelope was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The probe did not come from the frame this bridge mounted.
    #[error("probe from a window other than the mounted surface")]
    ForeignProbe,
    /// Traffic arrived before any probe completed.
    #[error("no handshake has completed")]
    NotAuthenticated,
    /// Traffic came from a window other than the authenticated one.
    #[error("message from an unauthenticated window")]
    WrongWindow,
    /// The ids on the envelope are not the issued pair.
    #[error("handshake token mismatch")]
    TokenMismatch,
}

/// The bridge side of the handshake.
///
/// `W` is whatever identifies a window on the host: a `web_sys::Window` in the
/// browser, a plain id in tests. Only equality is needed.
///
/// # Examples
///
/// ```
/// use wallet_relay::bridge::handshake::{Handshake, HandshakeId, Rejection};
///
/// let mut handshake: Handshake<u32> = Handshake::new();
/// let mounted_frame = 7;
/// let child = HandshakeId::new();
///
/// // a probe from some other frame is refused
/// assert_eq!(handshake.on_probe(&3, &mounted_frame, child), Err(Rejection::ForeignProbe));
///
/// let token = handshake.on_probe(&7, &mounted_frame, child).unwrap();
/// assert_eq!(token.parent_id, handshake.parent_id());
/// assert!(handshake.authenticate(&7, token.parent_id, token.child_id).is_ok());
/// assert_eq!(
///     handshake.authenticate(&3, token.parent_id, token.child_id),
///     Err(Rejection::WrongWindow)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Handshake<W> {
    parent_id: HandshakeId,
    state: HandshakeState<W>,
}

impl<W: Clone + PartialEq> Default for Handshake<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Clone + PartialEq> Handshake<W> {
    /// A handshake awaiting its first probe, with a fresh parent id.
    pub fn new() -> Self {
        Handshake {
            parent_id: HandshakeId::new(),
            state: HandshakeState::AwaitingHandshake,
        }
    }

    /// This bridge's id.
    pub fn parent_id(&self) -> HandshakeId {
        self.parent_id
    }

    /// Current state.
    pub fn state(&self) -> &HandshakeState<W> {
        &self.state
    }

    /// Whether a surface holds a token pair.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, HandshakeState::Authenticated { .. })
    }

    /// The authenticated window, if any.
    pub fn window(&self) -> Option<&W> {
        match &self.state {
            HandshakeState::Authenticated { window, .. } => Some(window),
            HandshakeState::AwaitingHandshake => None,
        }
    }

    /// The issued token pair, if any.
    pub fn token(&self) -> Option<HandshakeToken> {
        match &self.state {
            HandshakeState::Authenticated { child_id, .. } => Some(HandshakeToken {
                parent_id: self.parent_id,
                child_id: *child_id,
            }),
            HandshakeState::AwaitingHandshake => None,
        }
    }

    /// Handles a probe from `source` carrying `child_id`.
    ///
    /// `mounted` is the window of the frame this bridge created. On success
    /// the bridge is authenticated for `source` and the returned pair must be
    /// sent back to `source` as a welcome.
    pub fn on_probe(
        &mut self,
        source: &W,
        mounted: &W,
        child_id: HandshakeId,
    ) -> Result<HandshakeToken, Rejection> {
        if source != mounted {
            return Err(Rejection::ForeignProbe);
        }
        self.state = HandshakeState::Authenticated {
            child_id,
            window: source.clone(),
        };
        Ok(HandshakeToken {
            parent_id: self.parent_id,
            child_id,
        })
    }

    /// Checks that UI-channel traffic from `source` carrying the given ids
    /// belongs to the authenticated surface.
    pub fn authenticate(
        &self,
        source: &W,
        parent_id: HandshakeId,
        child_id: HandshakeId,
    ) -> Result<(), Rejection> {
        match &self.state {
            HandshakeState::AwaitingHandshake => Err(Rejection::NotAuthenticated),
            HandshakeState::Authenticated { window, .. } if window != source => {
                Err(Rejection::WrongWindow)
            }
            HandshakeState::Authenticated {
                child_id: issued, ..
            } => {
                if parent_id == self.parent_id && child_id == *issued {
                    Ok(())
                } else {
                    Err(Rejection::TokenMismatch)
                }
            }
        }
    }

    /// Forgets the token pair; the parent id is kept.
    pub fn reset(&mut self) {
        self.state = HandshakeState::AwaitingHandshake;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: u32 = 1;

    #[test]
    fn traffic_before_probe_is_refused() {
        let handshake: Handshake<u32> = Handshake::new();
        assert_eq!(
            handshake.authenticate(&FRAME, handshake.parent_id(), HandshakeId::new()),
            Err(Rejection::NotAuthenticated)
        );
    }

    #[test]
    fn forged_ids_are_refused_even_from_the_right_window() {
        let mut handshake: Handshake<u32> = Handshake::new();
        let token = handshake.on_probe(&FRAME, &FRAME, HandshakeId::new()).unwrap();
        assert_eq!(
            handshake.authenticate(&FRAME, HandshakeId::new(), token.child_id),
            Err(Rejection::TokenMismatch)
        );
        assert_eq!(
            handshake.authenticate(&FRAME, token.parent_id, HandshakeId::new()),
            Err(Rejection::TokenMismatch)
        );
    }

    #[test]
    fn reprobe_from_same_frame_reissues() {
        let mut handshake: Handshake<u32> = Handshake::new();
        let first = handshake.on_probe(&FRAME, &FRAME, HandshakeId::new()).unwrap();
        let second = handshake.on_probe(&FRAME, &FRAME, HandshakeId::new()).unwrap();
        assert_eq!(first.parent_id, second.parent_id);
        assert_ne!(first.child_id, second.child_id);
        assert_eq!(
            handshake.authenticate(&FRAME, first.parent_id, first.child_id),
            Err(Rejection::TokenMismatch)
        );
        assert!(handshake.authenticate(&FRAME, second.parent_id, second.child_id).is_ok());
    }

    #[test]
    fn bridges_in_different_tabs_have_different_parents() {
        let tab_a: Handshake<u32> = Handshake::new();
        let tab_b: Handshake<u32> = Handshake::new();
        assert_ne!(tab_a.parent_id(), tab_b.parent_id());
    }

    #[test]
    fn reset_returns_to_awaiting() {
        let mut handshake: Handshake<u32> = Handshake::new();
        handshake.on_probe(&FRAME, &FRAME, HandshakeId::new()).unwrap();
        handshake.reset();
        assert_eq!(handshake.state(), &HandshakeState::AwaitingHandshake);
        assert!(handshake.token().is_none());
    }
}
