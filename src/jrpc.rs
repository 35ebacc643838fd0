//! EIP-1193 request and error types.
//!
//! This module provides the request/response vocabulary that the page-facing
//! provider speaks. It follows the shape of JSON-RPC 2.0 (method, params,
//! structured error) but uses the provider error codes defined by
//! [EIP-1193](https://eips.ethereum.org/EIPS/eip-1193) in addition to the
//! JSON-RPC reserved range.
//!
//! # Overview
//!
//! The module provides two main types:
//! - [`RequestArguments`]: the `{ method, params }` object a dApp passes to `request()`
//! - [`ProviderRpcError`]: the structured error a dApp receives when a request is rejected
//!
//! # Error codes
//!
//! Codes a dApp may receive, whether minted here or relayed from the wallet UI:
//!
//! | Code   | Meaning |
//! |--------|---------|
//! | 4001   | User rejected the request |
//! | 4100   | The requested method/account is not authorized |
//! | 4200   | The provider does not support the method |
//! | 4900   | The provider is disconnected from all chains |
//! | 4901   | The provider is not connected to the requested chain |
//! | -32700 | Parse error |
//! | -32600 | Invalid request |
//! | -32601 | Method not found |
//! | -32602 | Invalid params |
//! | -32603 | Internal error |
//!
//! # Examples
//!
//! ```
//! use wallet_relay::jrpc::{ProviderRpcError, RequestArguments};
//! use serde_json::json;
//!
//! let args = RequestArguments::new("eth_requestAccounts", None);
//! let serialized = serde_json::to_string(&args).unwrap();
//! assert!(serialized.contains("\"method\":\"eth_requestAccounts\""));
//! assert!(!serialized.contains("params"));
//!
//! let err = ProviderRpcError::user_rejected();
//! assert_eq!(err.code, 4001);
//! assert_eq!(serde_json::to_value(&err).unwrap()["code"], json!(4001));
//! ```

use std::fmt::{Display, Formatter};

/// Code for a request the user declined.
pub const USER_REJECTED: i32 = 4001;
/// Code for a provider disconnected from all chains.
pub const DISCONNECTED: i32 = 4900;

/// The argument object of an EIP-1193 `request()` call.
///
/// # Examples
///
/// ```
/// use wallet_relay::jrpc::RequestArguments;
/// use serde_json::json;
///
/// let args = RequestArguments::new("eth_call", Some(json!([{"to": "0x00"}, "latest"])));
/// assert_eq!(args.method, "eth_call");
///
/// let parsed: RequestArguments = serde_json::from_str(r#"{"method":"eth_chainId"}"#).unwrap();
/// assert!(parsed.params.is_none());
/// ```
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct RequestArguments {
    /// The RPC method name, e.g. `eth_requestAccounts`
    pub method: String,
    /// Optional positional or named parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestArguments {
    /// Creates request arguments for `method`.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// An EIP-1193 provider error.
///
/// This is the only error type that is ever observed by page code. Every failure
/// inside the relay that should be visible to a dApp is converted into one of
/// these and delivered as a promise rejection.
///
/// # Examples
///
/// ```
/// use wallet_relay::jrpc::ProviderRpcError;
///
/// let error = ProviderRpcError::unsupported_method("eth_sign");
/// assert_eq!(error.code, 4200);
/// assert_eq!(error.to_string(), "Error 4200: The provider does not support eth_sign");
///
/// let parsed: ProviderRpcError =
///     serde_json::from_str(r#"{"code":-32000,"message":"header not found"}"#).unwrap();
/// assert!(parsed.data.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProviderRpcError {
    /// Numeric error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional information about the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Display for ProviderRpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderRpcError {}

impl ProviderRpcError {
    /// Creates a new error with a custom code and message.
    pub fn new(code: i32, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// The user rejected the request (4001).
    ///
    /// This is also the rejection a dApp receives when a request cannot be
    /// answered at all, so that its promise never hangs.
    pub fn user_rejected() -> Self {
        Self::new(USER_REJECTED, "User rejected the request.", None)
    }

    /// The provider is disconnected (4900).
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_relay::jrpc::ProviderRpcError;
    ///
    /// let error = ProviderRpcError::disconnected("request timed out");
    /// assert_eq!(error.code, 4900);
    /// assert_eq!(error.message, "request timed out");
    /// ```
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::new(DISCONNECTED, reason, None)
    }

    /// The argument object is not a valid request (-32600).
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(
            -32600,
            "Invalid Request",
            Some(serde_json::Value::String(detail.into())),
        )
    }

    /// The method exists but the params are invalid (-32602).
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(
            -32602,
            "Invalid params",
            Some(serde_json::Value::String(detail.into())),
        )
    }

    /// An internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(-32603, message, None)
    }

    /// Whether this is a user rejection.
    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_round_trip_through_json() {
        let args = RequestArguments::new("personal_sign", Some(json!(["0xdead", "0xbeef"])));
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value, json!({"method": "personal_sign", "params": ["0xdead", "0xbeef"]}));
    }

    #[test]
    fn error_data_is_omitted_when_absent() {
        let value = serde_json::to_value(ProviderRpcError::user_rejected()).unwrap();
        assert_eq!(value.get("data"), None);
        assert_eq!(value["code"], json!(4001));
    }

    #[test]
    fn invalid_params_carries_detail() {
        let error = ProviderRpcError::invalid_params("expected an address");
        assert_eq!(error.code, -32602);
        assert_eq!(error.data, Some(json!("expected an address")));
        assert!(!error.is_user_rejection());
    }
}
