//! FortiFlex SSO Gateway binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use fortiflex_gateway::api::{create_router, AppState};
use fortiflex_gateway::config::GatewayConfig;
use fortiflex_gateway::saml::ServiceProvider;
use fortiflex_gateway::session::{
    spawn_cleanup_task, MemorySessionStore, RedbSessionStore, SessionStore,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "fortiflex-gateway")]
#[command(about = "SAML SSO gateway for the FortiFlex API")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000", env = "GATEWAY_LISTEN")]
    listen: SocketAddr,

    /// JSON config file merged over the command line values
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// SAML SP entity ID
    #[arg(long, default_value = "", env = "SAML_ENTITY_ID")]
    saml_entity_id: String,

    /// SAML Assertion Consumer Service URL
    #[arg(long, default_value = "", env = "SAML_ACS_URL")]
    saml_acs_url: String,

    /// IdP SSO URL
    #[arg(long, env = "SAML_IDP_SSO_URL")]
    saml_idp_sso_url: Option<String>,

    /// IdP Single Logout URL
    #[arg(long, env = "SAML_IDP_SLO_URL")]
    saml_idp_slo_url: Option<String>,

    /// IdP entity ID expected as the response issuer
    #[arg(long, env = "SAML_IDP_ENTITY_ID")]
    saml_idp_entity_id: Option<String>,

    /// Accept SAML responses without a signature element
    #[arg(long, env = "SAML_ALLOW_UNSIGNED")]
    saml_allow_unsigned: bool,

    /// Where the browser lands after login
    #[arg(long, default_value = "/", env = "LANDING_URL")]
    landing_url: String,

    /// Where the browser lands after logout
    #[arg(long, default_value = "/", env = "LOGOUT_REDIRECT_URL")]
    logout_redirect_url: String,

    /// Session store file (redb). In-memory when unset.
    #[arg(long, env = "SESSION_STORE_PATH")]
    session_store_path: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, default_value_t = 8 * 60 * 60, env = "SESSION_TTL_SECS")]
    session_ttl_secs: u64,

    /// Send the session cookie without the Secure attribute (local development)
    #[arg(long, env = "COOKIE_INSECURE")]
    cookie_insecure: bool,

    /// FortiCare OAuth base URL
    #[arg(long, env = "FORTIFLEX_AUTH_BASE_URL")]
    fortiflex_auth_base_url: Option<String>,

    /// FortiFlex API base URL
    #[arg(long, env = "FORTIFLEX_API_BASE_URL")]
    fortiflex_api_base_url: Option<String>,

    /// Allowed CORS origins (comma-separated)
    #[arg(long, env = "CORS_ORIGINS")]
    cors_origins: Option<String>,

    /// Expose /api/session-debug
    #[arg(long, env = "DEBUG_SESSION")]
    debug_session: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "GATEWAY_VERBOSE")]
    verbose: bool,
}

fn config_from_args(args: &Args) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::default();

    config.saml.entity_id = args.saml_entity_id.clone();
    config.saml.acs_url = args.saml_acs_url.clone();
    config.saml.idp.sso_url = args.saml_idp_sso_url.clone();
    config.saml.idp.slo_url = args.saml_idp_slo_url.clone();
    config.saml.idp.entity_id = args.saml_idp_entity_id.clone();
    config.saml.allow_unsigned_assertions = args.saml_allow_unsigned;
    config.saml.landing_url = args.landing_url.clone();
    config.saml.logout_redirect_url = args.logout_redirect_url.clone();

    config.session.store_path = args.session_store_path.clone();
    config.session.session_ttl_secs = args.session_ttl_secs;
    config.session.cookie.secure = !args.cookie_insecure;

    if let Some(ref url) = args.fortiflex_auth_base_url {
        config.fortiflex.auth_base_url = url.clone();
    }
    if let Some(ref url) = args.fortiflex_api_base_url {
        config.fortiflex.api_base_url = url.clone();
    }

    if let Some(ref origins) = args.cors_origins {
        config.cors_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }
    config.debug_session = args.debug_session;

    if let Some(ref path) = args.config {
        config.merge_file(path)?;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    info!("Starting FortiFlex SSO Gateway");

    let config = config_from_args(&args)?;

    info!(
        entity_id = %config.saml.entity_id,
        slo_configured = config.saml.idp.slo_url.is_some(),
        api_base_url = %config.fortiflex.api_base_url,
        cors_origins = config.cors_origins.len(),
        debug_session = config.debug_session,
        "Configuration loaded"
    );

    let store: Arc<dyn SessionStore> = match config.session.store_path {
        Some(ref path) => {
            let store = RedbSessionStore::open(path)
                .with_context(|| format!("Failed to open session store at {}", path))?;
            info!(path = %path, "Session store initialized");
            Arc::new(store)
        }
        None => {
            info!("Using in-memory session store");
            Arc::new(MemorySessionStore::new())
        }
    };

    let _cleanup_handle = spawn_cleanup_task(
        Arc::clone(&store),
        config.session.cleanup_interval_secs,
    );

    let provider = Arc::new(ServiceProvider::new(config.saml.clone())?);
    let state = Arc::new(AppState::new(&config, store, provider)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
