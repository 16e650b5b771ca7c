//! FortiFlex SSO Gateway
//!
//! Federates browser users through SAML, keeps their FortiFlex API
//! credentials in a server-side session, mints and caches FortiFlex bearer
//! tokens, and proxies a fixed set of FortiFlex v2 operations.

pub mod api;
pub mod config;
pub mod error;
pub mod fortiflex;
pub mod saml;
pub mod session;

pub use api::{create_router, AppState, SharedState};
pub use config::GatewayConfig;
pub use error::GatewayError;
