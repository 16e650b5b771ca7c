//! Server-side sessions keyed by an unguessable cookie value.
//!
//! Storage is pluggable (in-memory or redb), access goes through a
//! [`SessionContext`] whose writes are serialized per session ID, and a
//! background task evicts expired sessions.

pub mod cleanup;
pub mod config;
pub mod context;
pub mod locks;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, sweep};
pub use config::{CookieConfig, SameSite, SessionConfig, SessionConfigJson};
pub use context::{SessionContext, SessionManager};
pub use locks::KeyedLocks;
pub use store::{MemorySessionStore, RedbSessionStore, SessionStore};
pub use types::{
    AccessToken, ConfigTypeMapping, Session, SessionId, UserIdentity, VendorCredentials,
    MAX_TOKEN_LIFETIME_SECS,
};
