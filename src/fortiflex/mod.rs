//! FortiFlex credential vault, token manager and API proxy.

pub mod config;
pub mod credentials;
pub mod proxy;
pub mod routes;
pub mod token;

pub use config::{FortiFlexConfig, FortiFlexConfigJson};
pub use credentials::store_credentials;
pub use proxy::{derive_config_types, ProxyDispatcher};
pub use routes::{EdgeMethod, RouteDescriptor, SessionField, ROUTES};
pub use token::TokenManager;
