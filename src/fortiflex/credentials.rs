//! Per-session storage of FortiFlex API credentials.

use serde::Deserialize;
use serde_json::error::Category;
use serde_json::{json, Value};
use tracing::info;

use crate::error::GatewayError;
use crate::session::{SessionContext, VendorCredentials};

/// Inbound credential payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsPayload {
    username: String,
    api_key: String,
    serial_number: String,
    account_id: String,
}

/// Parse and validate a credentials body.
pub fn parse_credentials(body: &[u8]) -> Result<VendorCredentials, GatewayError> {
    let payload: CredentialsPayload = serde_json::from_slice(body).map_err(payload_error)?;

    if payload.username.trim().is_empty() {
        return Err(GatewayError::Validation("username must not be empty".to_string()));
    }
    if payload.api_key.trim().is_empty() {
        return Err(GatewayError::Validation("apiKey must not be empty".to_string()));
    }

    Ok(VendorCredentials {
        username: payload.username,
        api_key: payload.api_key,
        serial_number: payload.serial_number,
        account_id: payload.account_id,
    })
}

/// Describe a payload parse failure by position only. serde_json messages
/// can quote the offending value, which may be the API key.
fn payload_error(e: serde_json::Error) -> GatewayError {
    let problem = match e.classify() {
        Category::Data => "missing or mistyped field",
        Category::Syntax | Category::Eof | Category::Io => "malformed JSON",
    };
    GatewayError::Validation(format!(
        "Invalid credentials payload: {} at line {} column {}",
        problem,
        e.line(),
        e.column()
    ))
}

/// Store credentials in the session, dropping any token minted for the old ones.
pub async fn store_credentials(ctx: &SessionContext, body: &[u8]) -> Result<Value, GatewayError> {
    let credentials = parse_credentials(body)?;
    let username = credentials.username.clone();

    ctx.update(move |session| session.set_vendor_credentials(credentials))
        .await?;

    info!(session_id = %ctx.id(), username = %username, "FortiFlex credentials stored");
    Ok(json!({"message": "Credentials stored successfully"}))
}
