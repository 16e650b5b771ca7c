//! HTTP surface of the gateway.

mod handlers;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{HeaderValue, COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::Method;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use axum_extra::extract::cookie::Cookie;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::fortiflex::{EdgeMethod, ProxyDispatcher, TokenManager, ROUTES};
use crate::saml::{IdentityFederation, SamlProvider};
use crate::session::{SessionContext, SessionManager, SessionStore};

pub type SharedState = Arc<AppState>;

/// Everything the handlers need, built once at startup.
pub struct AppState {
    pub sessions: SessionManager,
    pub federation: IdentityFederation,
    pub proxy: ProxyDispatcher,
    pub debug_session: bool,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn SamlProvider>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fortiflex.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let tokens = Arc::new(TokenManager::new(
            http_client.clone(),
            config.fortiflex.clone(),
        ));

        Ok(Self {
            sessions: SessionManager::new(store, config.session.clone()),
            federation: IdentityFederation::new(provider, config.saml.clone()),
            proxy: ProxyDispatcher::new(http_client, config.fortiflex.clone(), tokens),
            debug_session: config.debug_session,
            cors_origins: config.cors_origins.clone(),
        })
    }
}

/// Session resolved from the request cookie.
///
/// `fresh` is set when the request carried no cookie naming a live session,
/// in which case a brand-new ID was allocated and must be sent back if
/// anything is stored.
pub struct SessionHandle {
    pub ctx: SessionContext,
    pub fresh: bool,
}

impl FromRequestParts<SharedState> for SessionHandle {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let cookies: Vec<&str> = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let header = (!cookies.is_empty()).then(|| cookies.join("; "));

        let (ctx, fresh) = state.sessions.resolve(header.as_deref()).await;
        Ok(Self { ctx, fresh })
    }
}

/// Attach a `Set-Cookie` header to `response`.
fn set_cookie(response: &mut Response, cookie: &Cookie<'_>) -> Result<(), GatewayError> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| GatewayError::Internal(format!("Invalid session cookie: {}", e)))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

pub fn create_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/login", get(handlers::login))
        .route("/saml/acs", post(handlers::assertion_consumer))
        .route("/logout", get(handlers::logout))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/fortiflex/credentials", post(handlers::store_credentials));

    for route in ROUTES {
        let handler = move |State(state): State<SharedState>, session: SessionHandle, body: Bytes| {
            handlers::proxy(state, route, session, body)
        };
        router = match route.edge_method {
            EdgeMethod::Post => router.route(&route.edge_path(), post(handler)),
            EdgeMethod::Put => router.route(&route.edge_path(), put(handler)),
        };
    }

    if state.debug_session {
        warn!("Session debug endpoint enabled");
        router = router.route("/api/session-debug", get(handlers::session_debug));
    }

    if !state.cors_origins.is_empty() {
        router = router.layer(build_cors_layer(&state.cors_origins));
    }

    router.with_state(state)
}

/// CORS layer for a list of explicit origins, with credentials allowed.
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
