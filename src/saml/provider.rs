//! SAML Service Provider implementation.
//!
//! Handles the SP-initiated SSO flow, ACS response validation and
//! single-logout request construction.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use samael::schema::{Assertion, Response};
use std::collections::HashMap;
use tracing::{debug, info};

use super::config::SamlConfig;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Identity facts extracted from a validated assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAssertion {
    /// Assertion `ID`, the replay key.
    pub assertion_id: String,
    /// `Conditions/@NotOnOrAfter`, when present.
    pub valid_until: Option<DateTime<Utc>>,
    pub name_id: String,
    pub session_index: Option<String>,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Result of checking a SAML response.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertionOutcome {
    /// The response failed validation; every failure is listed.
    Invalid(Vec<String>),
    /// The response is well formed but the IdP did not authenticate the user.
    NotAuthenticated(String),
    Authenticated(ValidatedAssertion),
}

/// SAML capability used by the identity federation layer.
pub trait SamlProvider: Send + Sync {
    /// Redirect URL carrying a deflated AuthnRequest.
    fn build_login_redirect(&self, relay_state: Option<&str>) -> Result<String>;

    /// Validate the base64 `SAMLResponse` posted to the ACS endpoint.
    fn validate_assertion(&self, saml_response: &str) -> AssertionOutcome;

    /// Redirect URL carrying a deflated LogoutRequest.
    fn build_logout_redirect(
        &self,
        name_id: Option<&str>,
        session_index: Option<&str>,
    ) -> Result<String>;
}

/// `samael`-backed Service Provider.
pub struct ServiceProvider {
    config: SamlConfig,
}

impl ServiceProvider {
    /// Create a new SAML provider with the given configuration.
    pub fn new(config: SamlConfig) -> Result<Self> {
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(Self { config })
    }

    fn parse_response(&self, saml_response: &str) -> Result<Response> {
        let compact: String = saml_response
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let response_xml = BASE64
            .decode(compact)
            .context("Failed to decode SAML response")?;
        let response_str =
            String::from_utf8(response_xml).context("SAML response is not valid UTF-8")?;

        response_str
            .parse()
            .context("Failed to parse SAML response")
    }

    /// Issuer and signature checks.
    fn trust_errors(&self, response: &Response, assertion: &Assertion) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(expected) = self.config.idp.entity_id.as_deref() {
            let issuer = assertion
                .issuer
                .value
                .as_deref()
                .or_else(|| response.issuer.as_ref()?.value.as_deref());
            if issuer != Some(expected) {
                errors.push(format!(
                    "Unexpected issuer: {}",
                    issuer.unwrap_or("<missing>")
                ));
            }
        }

        let signed = response.signature.is_some() || assertion.signature.is_some();
        if !signed && !self.config.allow_unsigned_assertions {
            errors.push("SAML response is not signed".to_string());
        }

        errors
    }

    /// `Conditions` validity window, widened by the configured skew.
    fn window_errors(&self, assertion: &Assertion) -> Vec<String> {
        let Some(ref conditions) = assertion.conditions else {
            return Vec::new();
        };
        let now = Utc::now();
        let skew = Duration::seconds(self.config.clock_skew_secs);

        let mut errors = Vec::new();
        if conditions.not_before.is_some_and(|t| now < t - skew) {
            errors.push("SAML assertion not yet valid".to_string());
        }
        if conditions.not_on_or_after.is_some_and(|t| now >= t + skew) {
            errors.push("SAML assertion has expired".to_string());
        }
        errors
    }
}

impl SamlProvider for ServiceProvider {
    fn build_login_redirect(&self, relay_state: Option<&str>) -> Result<String> {
        let sso_url = self
            .config
            .idp
            .sso_url
            .as_deref()
            .ok_or_else(|| anyhow!("IdP SSO URL not configured"))?;

        let request_id = format!("_id{}", uuid::Uuid::new_v4());
        let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let name_id_policy = self
            .config
            .name_id_format
            .as_ref()
            .map(|f| {
                format!(
                    r#"<samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                    xml_escape(f)
                )
            })
            .unwrap_or_default();

        let authn_request = format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                ID="{}"
                Version="2.0"
                IssueInstant="{}"
                Destination="{}"
                ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
                AssertionConsumerServiceURL="{}">
                <saml:Issuer>{}</saml:Issuer>{}
            </samlp:AuthnRequest>"#,
            request_id,
            issue_instant,
            xml_escape(sso_url),
            xml_escape(&self.config.acs_url),
            xml_escape(&self.config.entity_id),
            name_id_policy
        );

        let encoded = deflate_and_encode(&authn_request)?;
        let mut url = redirect_url(sso_url, &encoded);

        if let Some(state) = relay_state {
            url.push_str(&format!("&RelayState={}", urlencoding::encode(state)));
        }

        debug!(request_id = %request_id, "Created SAML AuthnRequest redirect");
        Ok(url)
    }

    fn validate_assertion(&self, saml_response: &str) -> AssertionOutcome {
        let response = match self.parse_response(saml_response) {
            Ok(response) => response,
            Err(e) => return AssertionOutcome::Invalid(vec![format!("{:#}", e)]),
        };

        if let Some(failure) = status_failure(&response) {
            return AssertionOutcome::NotAuthenticated(failure);
        }
        let Some(ref assertion) = response.assertion else {
            return AssertionOutcome::NotAuthenticated(
                "SAML response contains no assertion".to_string(),
            );
        };

        let mut errors = self.trust_errors(&response, assertion);
        errors.extend(self.window_errors(assertion));

        let subject = assertion
            .subject
            .as_ref()
            .and_then(|s| s.name_id.as_ref())
            .map(|n| n.value.clone());
        let name_id = match subject {
            Some(name_id) if errors.is_empty() => name_id,
            Some(_) => return AssertionOutcome::Invalid(errors),
            None => {
                errors.push("SAML assertion missing NameID".to_string());
                return AssertionOutcome::Invalid(errors);
            }
        };

        let session_index = assertion
            .authn_statements
            .iter()
            .flatten()
            .find_map(|stmt| stmt.session_index.clone());
        let attributes = collect_attributes(assertion);

        info!(
            assertion_id = %assertion.id,
            attributes = attributes.len(),
            "SAML assertion validated"
        );

        AssertionOutcome::Authenticated(ValidatedAssertion {
            assertion_id: assertion.id.clone(),
            valid_until: assertion.conditions.as_ref().and_then(|c| c.not_on_or_after),
            name_id,
            session_index,
            attributes,
        })
    }

    fn build_logout_redirect(
        &self,
        name_id: Option<&str>,
        session_index: Option<&str>,
    ) -> Result<String> {
        let slo_url = self
            .config
            .idp
            .slo_url
            .as_deref()
            .ok_or_else(|| anyhow!("IdP SLO URL not configured"))?;

        let request_id = format!("_id{}", uuid::Uuid::new_v4());
        let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let name_id_xml = format!(
            "<saml:NameID>{}</saml:NameID>",
            xml_escape(name_id.unwrap_or_default())
        );
        let session_index_xml = session_index
            .map(|idx| {
                format!(
                    "<samlp:SessionIndex>{}</samlp:SessionIndex>",
                    xml_escape(idx)
                )
            })
            .unwrap_or_default();

        let logout_request = format!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                ID="{}"
                Version="2.0"
                IssueInstant="{}"
                Destination="{}">
                <saml:Issuer>{}</saml:Issuer>{}{}
            </samlp:LogoutRequest>"#,
            request_id,
            issue_instant,
            xml_escape(slo_url),
            xml_escape(&self.config.entity_id),
            name_id_xml,
            session_index_xml
        );

        let encoded = deflate_and_encode(&logout_request)?;
        let mut url = redirect_url(slo_url, &encoded);
        url.push_str(&format!(
            "&RelayState={}",
            urlencoding::encode(&self.config.logout_redirect_url)
        ));

        debug!(request_id = %request_id, "Created SAML LogoutRequest redirect");
        Ok(url)
    }
}

/// `Some(reason)` when the top-level status is anything but Success.
fn status_failure(response: &Response) -> Option<String> {
    let status = response.status.as_ref()?;
    if status.status_code.value.as_deref() == Some(STATUS_SUCCESS) {
        return None;
    }
    let reason = status
        .status_message
        .as_ref()
        .and_then(|m| m.value.as_deref())
        .unwrap_or("Unknown error");
    Some(format!("SAML authentication failed: {}", reason))
}

/// Attribute name → values across every attribute statement. Attributes
/// without a name or without values are skipped.
fn collect_attributes(assertion: &Assertion) -> HashMap<String, Vec<String>> {
    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    let named = assertion
        .attribute_statements
        .iter()
        .flatten()
        .flat_map(|stmt| &stmt.attributes)
        .filter_map(|attr| Some((attr.name.as_ref()?, attr)));

    for (name, attr) in named {
        let values: Vec<String> = attr.values.iter().filter_map(|v| v.value.clone()).collect();
        if !values.is_empty() {
            attributes.entry(name.clone()).or_default().extend(values);
        }
    }
    attributes
}

fn redirect_url(endpoint: &str, encoded: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{}{}SAMLRequest={}",
        endpoint,
        separator,
        urlencoding::encode(encoded)
    )
}

/// Deflate and base64 encode for SAML redirect binding.
fn deflate_and_encode(xml: &str) -> Result<String> {
    use std::io::Write;

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
