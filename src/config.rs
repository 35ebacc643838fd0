//! Relay configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```
//! use wallet_relay::config::RelayConfig;
//!
//! let config = RelayConfig::from_json("{}").unwrap();
//! assert_eq!(config, RelayConfig::default());
//!
//! let config = RelayConfig::from_json(r#"{"margin": 8, "requestTimeoutMs": 120000}"#).unwrap();
//! assert_eq!(config.margin, 8.0);
//! assert!(RelayConfig::from_json(r#"{"margin": -1}"#).is_err());
//! ```

use crate::bridge::visual::{SizeTable, VisualState};
use crate::eip6963::ProviderInfo;
use crate::sys::time::Duration;

/// Error type for configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input was not valid JSON for a configuration.
    #[error("cannot parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How this wallet describes itself in EIP-6963 announcements.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProviderIdentity {
    /// Human-readable name
    pub name: String,
    /// Icon as a data URI
    pub icon: String,
    /// Reverse-DNS identifier
    pub rdns: String,
}

impl Default for ProviderIdentity {
    fn default() -> Self {
        ProviderIdentity {
            name: "Wallet Relay".to_owned(),
            icon: "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 32 32'%3E%3Ccircle cx='16' cy='16' r='16'/%3E%3C/svg%3E".to_owned(),
            rdns: "dev.wallet-relay".to_owned(),
        }
    }
}

impl ProviderIdentity {
    /// Describes this wallet with a freshly minted uuid.
    pub fn mint(&self) -> ProviderInfo {
        ProviderInfo::new(&self.name, &self.icon, &self.rdns)
    }
}

/// Configuration shared by the page provider and the bridge.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    /// Tag stamped on every bus envelope
    pub channel: String,
    /// Location of the embedded surface
    pub surface_url: String,
    /// Value of the `surface` query parameter
    pub surface_tag: String,
    /// Durable key holding the surface rectangle
    pub storage_key: String,
    /// Distance kept between the surface and the viewport edges, in CSS pixels
    pub margin: f64,
    /// Dimensions of each named size
    pub sizes: SizeTable,
    /// Starting rectangle when nothing is persisted
    pub default_rect: VisualState,
    /// EIP-6963 self-description
    pub provider_info: ProviderIdentity,
    /// Age after which pending requests may be evicted; `None` waits forever
    pub request_timeout_ms: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            channel: "wallet-relay".to_owned(),
            surface_url: "chrome-extension://wallet/surface.html".to_owned(),
            surface_tag: "dapp".to_owned(),
            storage_key: "wallet-relay:surface-rect".to_owned(),
            margin: 16.0,
            sizes: SizeTable::default(),
            default_rect: VisualState::new(16.0, 16.0, 360.0, 600.0),
            provider_info: ProviderIdentity::default(),
            request_timeout_ms: None,
        }
    }
}

impl RelayConfig {
    /// Parses and validates a configuration.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let config: RelayConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value is in range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.channel.is_empty() {
            return Err(Error::Invalid("channel must not be empty".into()));
        }
        if url::Url::parse(&self.surface_url).is_err() {
            return Err(Error::Invalid(format!(
                "surface_url {:?} is not a URL",
                self.surface_url
            )));
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(Error::Invalid("margin must be a non-negative number".into()));
        }
        for (size, dimensions) in self.sizes.iter() {
            if !(dimensions.width > 0.0 && dimensions.height > 0.0) {
                return Err(Error::Invalid(format!("size {size:?} must have a positive area")));
            }
        }
        if !(self.default_rect.width > 0.0 && self.default_rect.height > 0.0) {
            return Err(Error::Invalid("default_rect must have a positive area".into()));
        }
        if !self.provider_info.icon.starts_with("data:") {
            return Err(Error::Invalid("provider icon must be a data URI".into()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(Error::Invalid("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// The pending-request timeout, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RelayConfig::default().validate().unwrap();
        assert!(RelayConfig::default().request_timeout().is_none());
    }

    #[test]
    fn partial_size_table_keeps_other_defaults() {
        let config =
            RelayConfig::from_json(r#"{"sizes": {"modal": {"width": 600, "height": 800}}}"#).unwrap();
        assert_eq!(config.sizes.modal.width, 600.0);
        assert_eq!(config.sizes.regular, SizeTable::default().regular);
    }

    #[test]
    fn rejects_out_of_range_values() {
        for raw in [
            r#"{"sizes": {"compact": {"width": 0, "height": 64}}}"#,
            r#"{"requestTimeoutMs": 0}"#,
            r#"{"surfaceUrl": "not a url"}"#,
            r#"{"providerInfo": {"icon": "https://example.com/icon.png"}}"#,
            r#"{"channel": ""}"#,
        ] {
            assert!(matches!(RelayConfig::from_json(raw), Err(Error::Invalid(_))), "{raw}");
        }
        assert!(matches!(RelayConfig::from_json("[]"), Err(Error::Json(_))));
    }

    #[test]
    fn timeout_converts_to_duration() {
        let config = RelayConfig::from_json(r#"{"requestTimeoutMs": 1500}"#).unwrap();
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
    }
}
