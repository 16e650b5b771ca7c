//! SAML 2.0 Service Provider and identity federation.

pub mod config;
pub mod federation;
pub mod provider;

pub use config::{ClaimMapping, IdpConfig, SamlConfig, SamlConfigJson, DISPLAY_NAME_CLAIM};
pub use federation::{FederatedLogin, IdentityFederation};
pub use provider::{AssertionOutcome, SamlProvider, ServiceProvider, ValidatedAssertion};
