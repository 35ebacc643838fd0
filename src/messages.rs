//! Message types exchanged between the three execution contexts of a tab.
//!
//! Three contexts cooperate without shared memory:
//!
//! ```text
//!  ┌──────────────┐  broadcast bus   ┌───────────────┐  cross-window   ┌──────────────┐
//!  │ Page provider│ <──────────────> │ Context bridge│ <─────────────> │ Embedded UI  │
//!  │ (page script)│   BusEnvelope    │ (isolated)    │  ChannelFrame   │ (ext. origin)│
//!  └──────────────┘                  └───────────────┘                 └──────────────┘
//! ```
//!
//! Both channels carry the same closed set of [`RelayMessage`] kinds. Each kind
//! has a fixed [`Route`]: the bridge forwards [`Route::PageToUi`] kinds from the
//! bus to the surface, re-broadcasts [`Route::UiToPage`] kinds from the surface
//! to the bus unchanged, and consumes [`Route::UiToBridge`] kinds itself.
//!
//! Messages are self-describing (`{"type": ..., "payload": ...}`) and validated
//! on receipt. Anything that fails to parse is an [`Error`]; receivers log and
//! drop it, it is never fatal.
//!
//! # Examples
//!
//! ```
//! use wallet_relay::messages::{RelayMessage, Route};
//!
//! let message = RelayMessage::parse(
//!     r#"{"type":"account_change","payload":{"accounts":["0xabc"]}}"#
//! ).unwrap();
//! assert_eq!(message.route(), Route::UiToPage);
//!
//! assert!(RelayMessage::parse(r#"{"type":"launch_missiles"}"#).is_err());
//! ```

use crate::bridge::handshake::HandshakeId;
use crate::bridge::visual::{GesturePhase, SurfaceSize};
use crate::correlation::{CorrelationId, Outcome};
use crate::jrpc::ProviderRpcError;
use serde::Deserialize;

/// Error type for message decoding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input was not valid JSON for any known message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The input parsed but violates a message invariant.
    #[error("invalid message: {0}")]
    Invalid(&'static str),
    /// The input belongs to some other user of the channel.
    #[error("message for channel {0:?}")]
    ForeignChannel(String),
}

/// Which way a message kind travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// From the page provider to the embedded surface
    PageToUi,
    /// From the embedded surface to the page provider
    UiToPage,
    /// From the embedded surface to the bridge itself
    UiToBridge,
}

/// Deserializes a present field, including an explicit `null`, as `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Every message kind the relay understands.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum RelayMessage {
    /// A dApp call, correlated by `id`.
    RpcRequest {
        /// Correlation id minted by the page provider
        id: CorrelationId,
        /// RPC method
        method: String,
        /// RPC params
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },
    /// The answer to an [`RpcRequest`](RelayMessage::RpcRequest).
    ///
    /// Exactly one of `result` and `error` is present. `result` may be `null`.
    RpcResponse {
        /// Correlation id of the request being answered
        id: CorrelationId,
        /// Successful result
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        /// Failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ProviderRpcError>,
    },
    /// The selected accounts changed.
    AccountChange {
        /// New account list, selected account first
        accounts: Vec<String>,
    },
    /// The selected chain changed.
    NetworkChange {
        /// New chain id, hex encoded
        chain_id: String,
    },
    /// The wallet connected to a chain.
    Connect {
        /// Connected chain id, hex encoded
        chain_id: String,
    },
    /// The wallet disconnected.
    Disconnect {
        /// Reason, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ProviderRpcError>,
    },
    /// A competing provider tried to claim the page's wallet handle.
    ProviderAnnouncement {
        /// Self-reported name of the competitor, if it has one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// The user connected through the competing provider; it answers from now on.
    AdoptAlternative,
    /// The user switched back to this wallet.
    ReclaimSelf {
        /// Account to expose
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_address: Option<String>,
        /// Chain to expose
        chain_id: String,
    },
    /// Hand one in-flight request to the competing provider.
    DelegateCall {
        /// Correlation id of the request to hand over
        id: CorrelationId,
    },
    /// The embedded surface finished loading.
    Ready,
    /// The surface was dragged by a pointer delta.
    Drag {
        /// Horizontal delta, positive to the right
        dx: f64,
        /// Vertical delta, positive downwards
        dy: f64,
        /// Whether the gesture has ended
        phase: GesturePhase,
    },
    /// The surface selected a named size.
    Resize {
        /// Selected size
        size: SurfaceSize,
    },
}

impl RelayMessage {
    /// Parses and validates a message from JSON text.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let message: RelayMessage = serde_json::from_str(raw)?;
        message.validate()
    }

    /// Parses and validates a message from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let message: RelayMessage = serde_json::from_value(value)?;
        message.validate()
    }

    fn validate(self) -> Result<Self, Error> {
        match &self {
            RelayMessage::RpcResponse { result, error, .. } => match (result, error) {
                (Some(_), Some(_)) => Err(Error::Invalid("response has both result and error")),
                (None, None) => Err(Error::Invalid("response has neither result nor error")),
                _ => Ok(self),
            },
            RelayMessage::RpcRequest { method, .. } if method.is_empty() => {
                Err(Error::Invalid("request without a method"))
            }
            RelayMessage::Drag { dx, dy, .. } if !dx.is_finite() || !dy.is_finite() => {
                Err(Error::Invalid("non-finite drag delta"))
            }
            _ => Ok(self),
        }
    }

    /// Builds a response for `id` from an outcome.
    ///
    /// ```
    /// use wallet_relay::correlation::CorrelationId;
    /// use wallet_relay::messages::RelayMessage;
    /// use serde_json::json;
    ///
    /// let id = CorrelationId::new();
    /// let response = RelayMessage::response(id, Ok(json!(null)));
    /// let text = serde_json::to_string(&response).unwrap();
    /// assert!(text.contains("\"result\":null"));
    /// assert_eq!(RelayMessage::parse(&text).unwrap(), response);
    /// ```
    pub fn response(id: CorrelationId, outcome: Outcome) -> Self {
        match outcome {
            Ok(value) => RelayMessage::RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(error) => RelayMessage::RpcResponse {
                id,
                result: None,
                error: Some(error),
            },
        }
    }

    /// The route this kind of message travels.
    pub fn route(&self) -> Route {
        match self {
            RelayMessage::RpcRequest { .. } | RelayMessage::ProviderAnnouncement { .. } => {
                Route::PageToUi
            }
            RelayMessage::RpcResponse { .. }
            | RelayMessage::AccountChange { .. }
            | RelayMessage::NetworkChange { .. }
            | RelayMessage::Connect { .. }
            | RelayMessage::Disconnect { .. }
            | RelayMessage::AdoptAlternative
            | RelayMessage::ReclaimSelf { .. }
            | RelayMessage::DelegateCall { .. } => Route::UiToPage,
            RelayMessage::Ready | RelayMessage::Drag { .. } | RelayMessage::Resize { .. } => {
                Route::UiToBridge
            }
        }
    }

    /// The wire name of this message's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::RpcRequest { .. } => "rpc_request",
            RelayMessage::RpcResponse { .. } => "rpc_response",
            RelayMessage::AccountChange { .. } => "account_change",
            RelayMessage::NetworkChange { .. } => "network_change",
            RelayMessage::Connect { .. } => "connect",
            RelayMessage::Disconnect { .. } => "disconnect",
            RelayMessage::ProviderAnnouncement { .. } => "provider_announcement",
            RelayMessage::AdoptAlternative => "adopt_alternative",
            RelayMessage::ReclaimSelf { .. } => "reclaim_self",
            RelayMessage::DelegateCall { .. } => "delegate_call",
            RelayMessage::Ready => "ready",
            RelayMessage::Drag { .. } => "drag",
            RelayMessage::Resize { .. } => "resize",
        }
    }
}

/// A relay message as carried on the page-wide broadcast bus.
///
/// The bus is shared with arbitrary page scripts, so every message is stamped
/// with a channel tag and anything without the expected tag is ignored.
///
/// # Examples
///
/// ```
/// use wallet_relay::messages::{BusEnvelope, RelayMessage};
///
/// let raw = BusEnvelope::encode("wallet-relay", &RelayMessage::Ready).unwrap();
/// assert_eq!(BusEnvelope::decode(&raw, "wallet-relay").unwrap(), RelayMessage::Ready);
/// assert!(BusEnvelope::decode(&raw, "some-other-wallet").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BusEnvelope {
    /// Channel tag
    pub channel: String,
    /// The carried message
    pub message: RelayMessage,
}

impl BusEnvelope {
    /// Serializes `message` for `channel`.
    pub fn encode(channel: &str, message: &RelayMessage) -> Result<String, Error> {
        Ok(serde_json::to_string(&BusEnvelope {
            channel: channel.to_owned(),
            message: message.clone(),
        })?)
    }

    /// Parses an envelope and returns its message if it belongs to `channel`.
    pub fn decode(raw: &str, channel: &str) -> Result<RelayMessage, Error> {
        let envelope: BusEnvelope = serde_json::from_str(raw)?;
        if envelope.channel != channel {
            return Err(Error::ForeignChannel(envelope.channel));
        }
        envelope.message.validate()
    }
}

/// A frame on the cross-window channel between bridge and surface.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ChannelFrame {
    /// Sent by the surface to every ancestor window.
    Probe {
        /// Freshly generated surface id
        child_id: HandshakeId,
    },
    /// The bridge's direct reply to a probe.
    Welcome {
        /// The bridge's id
        parent_id: HandshakeId,
        /// The surface id echoed back
        child_id: HandshakeId,
    },
    /// A relay message from an authenticated party.
    Envelope {
        /// The bridge's id
        parent_id: HandshakeId,
        /// The surface's id
        child_id: HandshakeId,
        /// The carried message
        message: RelayMessage,
    },
}

impl ChannelFrame {
    /// Parses a frame, validating a carried message.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let frame: ChannelFrame = serde_json::from_str(raw)?;
        match frame {
            ChannelFrame::Envelope {
                parent_id,
                child_id,
                message,
            } => Ok(ChannelFrame::Envelope {
                parent_id,
                child_id,
                message: message.validate()?,
            }),
            other => Ok(other),
        }
    }

    /// Serializes this frame.
    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_tagged_with_camel_case_fields() {
        let message = RelayMessage::ReclaimSelf {
            selected_address: Some("0xabc".into()),
            chain_id: "0x1".into(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "reclaim_self", "payload": {"selectedAddress": "0xabc", "chainId": "0x1"}})
        );
        assert_eq!(
            serde_json::to_value(RelayMessage::Ready).unwrap(),
            json!({"type": "ready"})
        );
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let samples = vec![
            RelayMessage::RpcRequest { id: CorrelationId::new(), method: "eth_chainId".into(), params: None },
            RelayMessage::response(CorrelationId::new(), Ok(json!("0x1"))),
            RelayMessage::AccountChange { accounts: vec![] },
            RelayMessage::NetworkChange { chain_id: "0x1".into() },
            RelayMessage::Connect { chain_id: "0x1".into() },
            RelayMessage::Disconnect { error: None },
            RelayMessage::ProviderAnnouncement { name: None },
            RelayMessage::AdoptAlternative,
            RelayMessage::ReclaimSelf { selected_address: None, chain_id: "0x1".into() },
            RelayMessage::DelegateCall { id: CorrelationId::new() },
            RelayMessage::Ready,
            RelayMessage::Drag { dx: 1.0, dy: 2.0, phase: GesturePhase::Move },
            RelayMessage::Resize { size: SurfaceSize::Modal },
        ];
        for message in samples {
            let value = serde_json::to_value(&message).unwrap();
            assert_eq!(value["type"], json!(message.kind()));
        }
    }

    #[test]
    fn response_must_have_exactly_one_outcome() {
        let id = CorrelationId::new();
        let both = json!({"type": "rpc_response", "payload": {"id": id, "result": 1, "error": {"code": 4001, "message": "no"}}});
        let neither = json!({"type": "rpc_response", "payload": {"id": id}});
        assert!(matches!(RelayMessage::from_value(both), Err(Error::Invalid(_))));
        assert!(matches!(RelayMessage::from_value(neither), Err(Error::Invalid(_))));
    }

    #[test]
    fn null_result_is_a_result() {
        let id = CorrelationId::new();
        let raw = json!({"type": "rpc_response", "payload": {"id": id, "result": null}});
        let message = RelayMessage::from_value(raw).unwrap();
        assert_eq!(message, RelayMessage::response(id, Ok(json!(null))));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(RelayMessage::parse("not json"), Err(Error::Malformed(_))));
        assert!(matches!(
            RelayMessage::parse(r#"{"type":"drag","payload":{"dx":"far"}}"#),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            RelayMessage::parse(r#"{"type":"rpc_request","payload":{"id":"not-a-uuid","method":"x"}}"#),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn envelope_frames_validate_their_message() {
        let frame = ChannelFrame::Envelope {
            parent_id: HandshakeId::new(),
            child_id: HandshakeId::new(),
            message: RelayMessage::RpcRequest { id: CorrelationId::new(), method: String::new(), params: None },
        };
        let raw = frame.encode().unwrap();
        assert!(matches!(ChannelFrame::parse(&raw), Err(Error::Invalid(_))));

        let probe = ChannelFrame::Probe { child_id: HandshakeId::new() };
        assert_eq!(ChannelFrame::parse(&probe.encode().unwrap()).unwrap(), probe);
    }
}
