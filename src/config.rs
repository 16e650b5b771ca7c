//! Gateway configuration assembled from CLI/env and an optional JSON file.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::fortiflex::{FortiFlexConfig, FortiFlexConfigJson};
use crate::saml::{SamlConfig, SamlConfigJson};
use crate::session::{SessionConfig, SessionConfigJson};

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub saml: SamlConfig,
    pub session: SessionConfig,
    pub fortiflex: FortiFlexConfig,
    /// Browser origins allowed to call the API with credentials.
    pub cors_origins: Vec<String>,
    /// Expose the redacted session dump at `/api/session-debug`.
    pub debug_session: bool,
}

impl GatewayConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.saml.validate().map_err(|e| anyhow!(e))?;
        self.session.validate().map_err(|e| anyhow!(e))?;
        self.fortiflex.validate().map_err(|e| anyhow!(e))?;

        if self.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow!(
                "Wildcard CORS origin cannot be combined with credentialed requests"
            ));
        }

        Ok(())
    }

    /// Overlay a JSON config file on top of this configuration.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let json: GatewayConfigJson = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        json.apply_to(self);
        Ok(())
    }
}

/// JSON config file layout.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfigJson {
    #[serde(default)]
    pub saml: SamlConfigJson,
    #[serde(default)]
    pub session: SessionConfigJson,
    #[serde(default)]
    pub fortiflex: FortiFlexConfigJson,
    pub cors_origins: Option<Vec<String>>,
    pub debug_session: Option<bool>,
}

impl GatewayConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut GatewayConfig) {
        self.saml.apply_to(&mut config.saml);
        self.session.apply_to(&mut config.session);
        self.fortiflex.apply_to(&mut config.fortiflex);
        if let Some(ref origins) = self.cors_origins {
            config.cors_origins = origins.clone();
        }
        if let Some(debug) = self.debug_session {
            config.debug_session = debug;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.saml.entity_id = "https://gw.example.com".to_string();
        config.saml.acs_url = "https://gw.example.com/saml/acs".to_string();
        config.saml.idp.sso_url = Some("https://login.example.com/sso".to_string());
        config
    }

    #[test]
    fn test_validate_sections() {
        assert!(GatewayConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.cors_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "saml": {{"landing-url": "https://app.example.com/"}},
                "session": {{"cookie": {{"secure": false}}}},
                "fortiflex": {{"api-base-url": "http://127.0.0.1:9000"}},
                "cors-origins": ["https://app.example.com"],
                "debug-session": true
            }}"#
        )
        .unwrap();

        let mut config = valid_config();
        config.merge_file(file.path()).unwrap();

        assert_eq!(config.saml.landing_url, "https://app.example.com/");
        assert_eq!(config.saml.entity_id, "https://gw.example.com");
        assert!(!config.session.cookie.secure);
        assert_eq!(config.fortiflex.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.cors_origins, vec!["https://app.example.com"]);
        assert!(config.debug_session);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_missing_file() {
        let mut config = valid_config();
        assert!(config.merge_file(Path::new("/nonexistent/gateway.json")).is_err());
    }
}
