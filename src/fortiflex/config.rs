//! FortiFlex endpoint configuration.

use serde::{Deserialize, Serialize};

use crate::session::MAX_TOKEN_LIFETIME_SECS;

/// FortiFlex token endpoint and API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FortiFlexConfig {
    /// Base URL of the FortiCare OAuth service.
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,

    /// Base URL of the FortiFlex v2 API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OAuth client ID sent with the password grant.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Timeout for token and API calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Token lifetime assumed when the endpoint omits `expires_in`.
    #[serde(default = "default_expires_in")]
    pub default_expires_in_secs: i64,

    /// A token is refreshed once it is this close to expiry.
    #[serde(default = "default_refresh_margin")]
    pub token_refresh_margin_secs: i64,
}

fn default_auth_base_url() -> String {
    "https://customerapiauth.fortinet.com/api/v1".to_string()
}

fn default_api_base_url() -> String {
    "https://support.fortinet.com/ES/api/fortiflex/v2".to_string()
}

fn default_client_id() -> String {
    "flexvm".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_expires_in() -> i64 {
    3600 // 1 hour
}

fn default_refresh_margin() -> i64 {
    30
}

impl Default for FortiFlexConfig {
    fn default() -> Self {
        Self {
            auth_base_url: default_auth_base_url(),
            api_base_url: default_api_base_url(),
            client_id: default_client_id(),
            request_timeout_secs: default_request_timeout(),
            default_expires_in_secs: default_expires_in(),
            token_refresh_margin_secs: default_refresh_margin(),
        }
    }
}

impl FortiFlexConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [
            ("auth_base_url", &self.auth_base_url),
            ("api_base_url", &self.api_base_url),
        ] {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(format!("FortiFlex {} must be a valid HTTP(S) URL", name));
            }
        }

        if self.client_id.is_empty() {
            return Err("FortiFlex client_id must not be empty".to_string());
        }

        if self.request_timeout_secs == 0 {
            return Err("FortiFlex request_timeout_secs must be positive".to_string());
        }

        if !(1..=MAX_TOKEN_LIFETIME_SECS).contains(&self.default_expires_in_secs) {
            return Err(format!(
                "FortiFlex default_expires_in_secs must be between 1 and {}",
                MAX_TOKEN_LIFETIME_SECS
            ));
        }

        if self.token_refresh_margin_secs < 0 {
            return Err("FortiFlex token_refresh_margin_secs must not be negative".to_string());
        }

        Ok(())
    }

    /// Token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token/", self.auth_base_url.trim_end_matches('/'))
    }

    /// Full URL for a downstream API path.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

/// JSON overlay for the FortiFlex section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct FortiFlexConfigJson {
    pub auth_base_url: Option<String>,
    pub api_base_url: Option<String>,
    pub client_id: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub default_expires_in_secs: Option<i64>,
    pub token_refresh_margin_secs: Option<i64>,
}

impl FortiFlexConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut FortiFlexConfig) {
        if let Some(ref url) = self.auth_base_url {
            config.auth_base_url = url.clone();
        }
        if let Some(ref url) = self.api_base_url {
            config.api_base_url = url.clone();
        }
        if let Some(ref id) = self.client_id {
            config.client_id = id.clone();
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(secs) = self.default_expires_in_secs {
            config.default_expires_in_secs = secs;
        }
        if let Some(secs) = self.token_refresh_margin_secs {
            config.token_refresh_margin_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FortiFlexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_id, "flexvm");
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(
            config.token_url(),
            "https://customerapiauth.fortinet.com/api/v1/oauth/token/"
        );
    }

    #[test]
    fn test_api_url_joins_paths() {
        let config = FortiFlexConfig {
            api_base_url: "http://127.0.0.1:9000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.api_url("/configs/list"), "http://127.0.0.1:9000/configs/list");
    }

    #[test]
    fn test_validation() {
        let mut config = FortiFlexConfig {
            auth_base_url: "customerapiauth.fortinet.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.auth_base_url = default_auth_base_url();
        config.token_refresh_margin_secs = -1;
        assert!(config.validate().is_err());

        config.token_refresh_margin_secs = 30;
        config.default_expires_in_secs = MAX_TOKEN_LIFETIME_SECS + 1;
        assert!(config.validate().is_err());
        config.default_expires_in_secs = 0;
        assert!(config.validate().is_err());
        config.default_expires_in_secs = 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_overlay() {
        let json: FortiFlexConfigJson =
            serde_json::from_str(r#"{"client-id": "custom", "token-refresh-margin-secs": 10}"#)
                .unwrap();
        let mut config = FortiFlexConfig::default();
        json.apply_to(&mut config);
        assert_eq!(config.client_id, "custom");
        assert_eq!(config.token_refresh_margin_secs, 10);
        assert_eq!(config.request_timeout_secs, 60);
    }
}
