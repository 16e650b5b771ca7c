use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

use super::{set_cookie, SessionHandle, SharedState};
use crate::error::GatewayError;
use crate::fortiflex::{self, RouteDescriptor};

const REDACTED: &str = "[redacted]";

pub(super) async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginQuery {
    return_to: Option<String>,
}

pub(super) async fn login(
    State(state): State<SharedState>,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, GatewayError> {
    let url = state.federation.initiate_login(query.return_to.as_deref())?;
    Ok(Redirect::to(&url))
}

pub(super) async fn assertion_consumer(
    State(state): State<SharedState>,
    session: SessionHandle,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let form: HashMap<String, String> = serde_urlencoded::from_bytes(&body).map_err(|e| {
        GatewayError::SamlValidation(vec![format!("Malformed ACS form body: {}", e)])
    })?;

    let completed = state
        .federation
        .consume_assertion(&session.ctx, form.get("SAMLResponse").map(String::as_str))
        .await?;

    // RelayState is ignored: the landing page is fixed to avoid open redirects.
    let mut response = Redirect::to(&state.federation.config().landing_url).into_response();
    let cookie = state
        .sessions
        .config()
        .build_cookie(&completed.session.id().to_hex());
    set_cookie(&mut response, &cookie)?;
    Ok(response)
}

pub(super) async fn logout(
    State(state): State<SharedState>,
    session: SessionHandle,
) -> Result<Response, GatewayError> {
    let target = state.federation.logout(&session.ctx).await?;

    let mut response = Redirect::to(&target).into_response();
    set_cookie(&mut response, &state.sessions.config().clear_cookie())?;
    Ok(response)
}

pub(super) async fn whoami(session: SessionHandle) -> Json<Value> {
    let (user, config_types) = match session.ctx.load().await {
        Ok(s) => (s.identity, s.config_type_cache),
        Err(e) => {
            warn!(session_id = %session.ctx.id(), error = %e, "Failed to load session for whoami");
            (None, Vec::new())
        }
    };

    Json(json!({
        "user": user,
        "fortiflex_config_types": config_types,
    }))
}

pub(super) async fn store_credentials(
    State(state): State<SharedState>,
    session: SessionHandle,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let reply = fortiflex::store_credentials(&session.ctx, &body).await?;

    let mut response = Json(reply).into_response();
    if session.fresh {
        let cookie = state
            .sessions
            .config()
            .build_cookie(&session.ctx.id().to_hex());
        set_cookie(&mut response, &cookie)?;
    }
    Ok(response)
}

pub(super) async fn proxy(
    state: SharedState,
    route: &'static RouteDescriptor,
    session: SessionHandle,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let result = state.proxy.invoke(route, &session.ctx, &body).await?;
    Ok(Json(result))
}

pub(super) async fn session_debug(session: SessionHandle) -> Result<Json<Value>, GatewayError> {
    let s = session.ctx.load().await?;

    let credentials = s.vendor_credentials.as_ref().map(|c| {
        json!({
            "username": c.username,
            "apiKey": REDACTED,
            "serialNumber": c.serial_number,
            "accountId": c.account_id,
        })
    });
    let token = s.access_token.as_ref().map(|t| {
        json!({
            "token": REDACTED,
            "expires_at": t.expires_at,
        })
    });

    Ok(Json(json!({
        "session_id": s.id.to_hex(),
        "user": s.identity,
        "fortiflex_credentials": credentials,
        "access_token": token,
        "fortiflex_config_types": s.config_type_cache,
        "created_at": s.created_at,
        "expires_at": s.expires_at,
        "updated_at": s.updated_at,
    })))
}
