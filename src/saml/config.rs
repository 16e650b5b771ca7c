//! SAML Service Provider configuration.

use serde::{Deserialize, Serialize};

/// Claim carrying the user's display name (Entra ID / ADFS convention).
pub const DISPLAY_NAME_CLAIM: &str = "http://schemas.microsoft.com/identity/claims/displayname";

/// Identity Provider endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdpConfig {
    /// HTTP-Redirect SSO endpoint.
    #[serde(default)]
    pub sso_url: Option<String>,
    /// HTTP-Redirect single logout endpoint.
    #[serde(default)]
    pub slo_url: Option<String>,
    /// Expected response issuer. Not checked when unset.
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// Attribute names the identity is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimMapping {
    #[serde(default = "default_display_name_claim")]
    pub display_name: String,
    #[serde(default = "default_email_claim")]
    pub email: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            display_name: default_display_name_claim(),
            email: default_email_claim(),
        }
    }
}

/// SAML Service Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// SP Entity ID, sent as the request issuer.
    #[serde(default)]
    pub entity_id: String,

    /// Assertion Consumer Service URL.
    #[serde(default)]
    pub acs_url: String,

    #[serde(default)]
    pub idp: IdpConfig,

    /// Accept responses carrying no signature element at all.
    #[serde(default)]
    pub allow_unsigned_assertions: bool,

    /// NameID format requested in the AuthnRequest.
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Tolerance applied to the assertion `Conditions` window.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Post-login destination.
    #[serde(default = "default_root")]
    pub landing_url: String,

    /// Post-logout destination, also used when single logout is unavailable.
    #[serde(default = "default_root")]
    pub logout_redirect_url: String,

    #[serde(default)]
    pub claims: ClaimMapping,
}

fn default_clock_skew() -> i64 {
    300
}

fn default_root() -> String {
    "/".to_string()
}

fn default_display_name_claim() -> String {
    DISPLAY_NAME_CLAIM.to_string()
}

fn default_email_claim() -> String {
    "email".to_string()
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            acs_url: String::new(),
            idp: IdpConfig::default(),
            allow_unsigned_assertions: false,
            name_id_format: None,
            clock_skew_secs: default_clock_skew(),
            landing_url: default_root(),
            logout_redirect_url: default_root(),
            claims: ClaimMapping::default(),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

impl SamlConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.entity_id.is_empty() {
            return Err("SAML entity_id is required".to_string());
        }
        if self.acs_url.is_empty() {
            return Err("SAML acs_url is required".to_string());
        }

        match self.idp.sso_url.as_deref() {
            None => return Err("SAML IdP sso_url is required".to_string()),
            Some(url) if !is_http_url(url) => {
                return Err(format!("SAML IdP sso_url is not an HTTP(S) URL: {}", url))
            }
            Some(_) => {}
        }
        if let Some(url) = self.idp.slo_url.as_deref().filter(|u| !is_http_url(u)) {
            return Err(format!("SAML IdP slo_url is not an HTTP(S) URL: {}", url));
        }

        if self.clock_skew_secs < 0 {
            return Err("SAML clock_skew_secs must not be negative".to_string());
        }

        Ok(())
    }
}

/// IdP section of the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct IdpConfigJson {
    pub sso_url: Option<String>,
    pub slo_url: Option<String>,
    pub entity_id: Option<String>,
}

/// Claim section of the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ClaimMappingJson {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// SAML section of the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SamlConfigJson {
    pub entity_id: Option<String>,
    pub acs_url: Option<String>,
    #[serde(default)]
    pub idp: IdpConfigJson,
    pub allow_unsigned_assertions: Option<bool>,
    pub name_id_format: Option<String>,
    pub clock_skew_secs: Option<i64>,
    pub landing_url: Option<String>,
    pub logout_redirect_url: Option<String>,
    #[serde(default)]
    pub claims: ClaimMappingJson,
}

fn overlay<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

fn overlay_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *target = value.clone();
    }
}

impl SamlConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut SamlConfig) {
        overlay(&mut config.entity_id, &self.entity_id);
        overlay(&mut config.acs_url, &self.acs_url);
        overlay_opt(&mut config.idp.sso_url, &self.idp.sso_url);
        overlay_opt(&mut config.idp.slo_url, &self.idp.slo_url);
        overlay_opt(&mut config.idp.entity_id, &self.idp.entity_id);
        overlay(&mut config.allow_unsigned_assertions, &self.allow_unsigned_assertions);
        overlay_opt(&mut config.name_id_format, &self.name_id_format);
        overlay(&mut config.clock_skew_secs, &self.clock_skew_secs);
        overlay(&mut config.landing_url, &self.landing_url);
        overlay(&mut config.logout_redirect_url, &self.logout_redirect_url);
        overlay(&mut config.claims.display_name, &self.claims.display_name);
        overlay(&mut config.claims.email, &self.claims.email);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SamlConfig {
        SamlConfig {
            entity_id: "https://gw.example.com".to_string(),
            acs_url: "https://gw.example.com/saml/acs".to_string(),
            idp: IdpConfig {
                sso_url: Some("https://login.example.com/sso".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = SamlConfig::default();
        assert_eq!(config.clock_skew_secs, 300);
        assert_eq!(config.landing_url, "/");
        assert_eq!(config.claims.email, "email");
        assert_eq!(config.claims.display_name, DISPLAY_NAME_CLAIM);
        assert!(!config.allow_unsigned_assertions);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation() {
        assert!(minimal().validate().is_ok());

        let mut config = minimal();
        config.acs_url.clear();
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.idp.sso_url = Some("login.example.com/sso".to_string());
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.idp.slo_url = Some("ftp://login.example.com/slo".to_string());
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.clock_skew_secs = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_overlay() {
        let json: SamlConfigJson = serde_json::from_str(
            r#"{
                "idp": {"slo-url": "https://login.example.com/slo"},
                "landing-url": "https://app.example.com",
                "claims": {"email": "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress"}
            }"#,
        )
        .unwrap();
        let mut config = minimal();
        json.apply_to(&mut config);

        assert_eq!(config.idp.slo_url.as_deref(), Some("https://login.example.com/slo"));
        assert_eq!(config.idp.sso_url.as_deref(), Some("https://login.example.com/sso"));
        assert_eq!(config.landing_url, "https://app.example.com");
        assert!(config.claims.email.ends_with("emailaddress"));
        assert_eq!(config.claims.display_name, DISPLAY_NAME_CLAIM);
        assert_eq!(config.logout_redirect_url, "/");
    }
}
