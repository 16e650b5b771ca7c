//! Generic dispatcher for the FortiFlex route table.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::FortiFlexConfig;
use super::routes::{RouteDescriptor, SessionField};
use super::token::TokenManager;
use crate::error::GatewayError;
use crate::session::{ConfigTypeMapping, Session, SessionContext};

pub struct ProxyDispatcher {
    http_client: reqwest::Client,
    config: FortiFlexConfig,
    tokens: Arc<TokenManager>,
}

impl ProxyDispatcher {
    pub fn new(http_client: reqwest::Client, config: FortiFlexConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            http_client,
            config,
            tokens,
        }
    }

    /// Forward one operation on behalf of the session.
    pub async fn invoke(
        &self,
        route: &RouteDescriptor,
        ctx: &SessionContext,
        inbound: &[u8],
    ) -> Result<Value, GatewayError> {
        let session = ctx.load().await?;
        let body = outbound_body(route, &session, inbound)?;

        let token = self.tokens.get_valid_token(ctx).await?;

        debug!(session_id = %ctx.id(), route = route.name, "Forwarding FortiFlex request");

        let response = self
            .http_client
            .post(self.config.api_url(route.downstream_path))
            .bearer_auth(&token.token)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                warn!(route = route.name, error = %e, "FortiFlex request failed");
                GatewayError::Upstream {
                    status: None,
                    message: format!("FortiFlex request failed: {}", e),
                }
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| GatewayError::Upstream {
            status: Some(status.as_u16()),
            message: format!("Failed to read FortiFlex response: {}", e.without_url()),
        })?;

        if !status.is_success() {
            warn!(route = route.name, status = status.as_u16(), "FortiFlex API returned an error");
            return Err(GatewayError::Upstream {
                status: Some(status.as_u16()),
                message: format!(
                    "FortiFlex API error {}: {}",
                    status.as_u16(),
                    String::from_utf8_lossy(&bytes)
                ),
            });
        }

        let result = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice::<Value>(&bytes).map_err(|e| GatewayError::Upstream {
                status: Some(status.as_u16()),
                message: format!("FortiFlex returned invalid JSON: {}", e),
            })?
        };

        if route.derives_config_types {
            let mappings = derive_config_types(&result);
            let count = mappings.len();
            ctx.update(move |session| session.config_type_cache = mappings)
                .await?;
            debug!(session_id = %ctx.id(), configs = count, "Config type cache refreshed");
        }

        info!(
            session_id = %ctx.id(),
            route = route.name,
            status = status.as_u16(),
            "FortiFlex request completed"
        );

        Ok(result)
    }
}

/// Build the outbound JSON body for `route`.
///
/// Injecting routes use the inbound object as a template and overwrite the
/// injected keys from the session; every other route requires a JSON object.
fn outbound_body(
    route: &RouteDescriptor,
    session: &Session,
    inbound: &[u8],
) -> Result<Value, GatewayError> {
    if route.injects.is_empty() {
        return match serde_json::from_slice::<Value>(inbound) {
            Ok(body @ Value::Object(_)) => Ok(body),
            Ok(_) => Err(GatewayError::Validation(
                "Request body must be a JSON object".to_string(),
            )),
            Err(e) => Err(GatewayError::Validation(format!(
                "Invalid JSON request body: {}",
                e
            ))),
        };
    }

    let mut body = match serde_json::from_slice::<Value>(inbound) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    for field in route.injects {
        let value = session
            .vendor_credentials
            .as_ref()
            .map(|c| match field {
                SessionField::SerialNumber => c.serial_number.as_str(),
                SessionField::AccountId => c.account_id.as_str(),
            })
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                GatewayError::SessionFieldMissing(format!("{} not found in session", field.label()))
            })?;
        body.insert(field.body_key().to_string(), Value::String(value.to_string()));
    }

    Ok(Value::Object(body))
}

/// Extract `{id, type}` pairs from a configs listing.
pub fn derive_config_types(listing: &Value) -> Vec<ConfigTypeMapping> {
    listing
        .get("configs")
        .and_then(Value::as_array)
        .map(|configs| {
            configs
                .iter()
                .filter_map(|config| {
                    let id = config.get("id").filter(|v| !v.is_null())?;
                    let product_type = config.get("productType").filter(|v| !v.is_null())?;
                    Some(ConfigTypeMapping {
                        id: id.clone(),
                        config_type: product_type
                            .get("name")
                            .and_then(Value::as_str)
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
