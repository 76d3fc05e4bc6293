//! Configuration for the bridge.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default vendor API host (can be overridden at compile time via AIRPLUS_API_HOST).
pub const DEFAULT_API_HOST: &str = match option_env!("AIRPLUS_API_HOST") {
    Some(host) => host,
    None => "prod.eu-da.iot.versuni.com",
};

/// Default OIDC issuer base (overridable at compile time via AIRPLUS_OIDC_ISSUER).
pub const DEFAULT_OIDC_ISSUER_BASE: &str = match option_env!("AIRPLUS_OIDC_ISSUER") {
    Some(issuer) => issuer,
    None => "https://cdc.accounts.home.id/oidc/op/v1.0",
};

/// Default OIDC tenant path segment.
pub const DEFAULT_OIDC_TENANT_SEGMENT: &str = "4_JGZWlP8eQHpEqkvQElolbA";

/// Redirect URI registered for the mobile app client.
pub const DEFAULT_REDIRECT_URI: &str = "com.philips.air://loginredirect";

/// OAuth client id of the mobile app.
pub const DEFAULT_CLIENT_ID: &str = "-XsK7O6iEkLml77yDGDUi0ku";

/// Scope list requested during the authorization-code flow.
pub const DEFAULT_SCOPES: &str = "openid email profile address DI.Account.read DI.Account.write \
DI.AccountProfile.read DI.AccountProfile.write DI.AccountGeneralConsent.read \
DI.AccountGeneralConsent.write DI.GeneralConsent.read subscriptions profile_extended consents \
DI.AccountSubscription.read DI.AccountSubscription.write";

/// Default broker host.
pub const DEFAULT_BROKER_HOST: &str = "ats.prod.eu-da.iot.versuni.com";

/// Mobile-style user agent, kept close to official app traffic.
pub const HTTP_USER_AGENT: &str = "okhttp/4.12.0 (Android 14; Pixel 7)";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// OIDC endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer base URL, without trailing slash.
    #[serde(default = "default_issuer_base")]
    pub issuer_base: String,
    /// Tenant path segment between issuer base and endpoint name.
    #[serde(default = "default_tenant_segment")]
    pub tenant_segment: String,
    /// Redirect URI for the authorization-code flow.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Space-separated scope list.
    #[serde(default = "default_scopes")]
    pub scopes: String,
}

fn default_issuer_base() -> String {
    DEFAULT_OIDC_ISSUER_BASE.trim_end_matches('/').to_string()
}

fn default_tenant_segment() -> String {
    DEFAULT_OIDC_TENANT_SEGMENT.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer_base: default_issuer_base(),
            tenant_segment: default_tenant_segment(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
        }
    }
}

impl OidcConfig {
    /// Full authorize endpoint URL.
    pub fn authorize_url(&self) -> String {
        format!("{}/{}/authorize", self.issuer_base, self.tenant_segment)
    }

    /// Full token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}/{}/token", self.issuer_base, self.tenant_segment)
    }
}

/// Main bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Vendor API host.
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// OIDC endpoints.
    #[serde(default)]
    pub oidc: OidcConfig,
    /// Broker host.
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    /// Broker TLS port.
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    /// WebSocket path on the broker host.
    #[serde(default = "default_broker_path")]
    pub broker_path: String,
    /// MQTT keepalive in seconds.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u16,
    /// Device status polling interval in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How long before expiry a token refresh is forced, in seconds.
    #[serde(default = "default_refresh_lookahead_secs")]
    pub refresh_lookahead_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_host() -> String {
    DEFAULT_API_HOST.to_string()
}

fn default_broker_host() -> String {
    DEFAULT_BROKER_HOST.to_string()
}

fn default_broker_port() -> u16 {
    443
}

fn default_broker_path() -> String {
    "/mqtt".to_string()
}

fn default_keepalive_secs() -> u16 {
    4
}

fn default_poll_interval_secs() -> u64 {
    120
}

fn default_refresh_lookahead_secs() -> u64 {
    15 * 60
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_host: default_api_host(),
            oidc: OidcConfig::default(),
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            broker_path: default_broker_path(),
            keepalive_secs: default_keepalive_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            refresh_lookahead_secs: default_refresh_lookahead_secs(),
        }
    }
}

impl BridgeConfig {
    /// Create a new config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from a file, falling back to defaults.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BridgeConfig = serde_json::from_str(&content)?;
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("AIRPLUS_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(host) = std::env::var("AIRPLUS_BROKER_HOST") {
            self.broker_host = host;
        }
        if let Ok(interval) = std::env::var("AIRPLUS_POLL_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse() {
                self.poll_interval_secs = secs;
            }
        }
    }

    /// Vendor API base URL.
    pub fn api_base_url(&self) -> String {
        format!("https://{}/api", self.api_host)
    }

    /// Validate that derived URLs actually parse.
    pub fn validate(&self) -> CoreResult<()> {
        Url::parse(&self.api_base_url())?;
        Url::parse(&self.oidc.token_url())?;
        if self.poll_interval_secs == 0 {
            return Err(CoreError::Config("poll_interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.api_host, "prod.eu-da.iot.versuni.com");
        assert_eq!(config.broker_host, "ats.prod.eu-da.iot.versuni.com");
        assert_eq!(config.broker_port, 443);
        assert_eq!(config.broker_path, "/mqtt");
        assert_eq!(config.keepalive_secs, 4);
        assert_eq!(config.poll_interval_secs, 120);
        assert_eq!(config.refresh_lookahead_secs, 900);
    }

    #[test]
    fn test_oidc_urls() {
        let oidc = OidcConfig::default();
        assert_eq!(
            oidc.authorize_url(),
            "https://cdc.accounts.home.id/oidc/op/v1.0/4_JGZWlP8eQHpEqkvQElolbA/authorize"
        );
        assert_eq!(
            oidc.token_url(),
            "https://cdc.accounts.home.id/oidc/op/v1.0/4_JGZWlP8eQHpEqkvQElolbA/token"
        );
    }

    #[test]
    fn test_api_base_url() {
        let config = BridgeConfig::default();
        assert_eq!(config.api_base_url(), "https://prod.eu-da.iot.versuni.com/api");
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = BridgeConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.broker_host, config.broker_host);
        assert_eq!(parsed.oidc.tenant_segment, config.oidc.tenant_segment);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: BridgeConfig = serde_json::from_str(r#"{"log_level":"debug"}"#).unwrap();
        assert_eq!(parsed.log_level, "debug");
        assert_eq!(parsed.broker_port, 443);
    }
}
