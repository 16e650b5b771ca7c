//! Session state shared by the federation, credential and proxy layers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const SESSION_ID_LEN: usize = 16;

/// Opaque session key. Carried hex-encoded in the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Draw a fresh ID from the thread RNG.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `None` unless `s` is exactly the hex form of a session ID.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; SESSION_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Identity federated from a SAML assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(rename = "nameid")]
    pub name_id: String,
    pub session_index: Option<String>,
    /// Claim URI → values.
    pub attributes: HashMap<String, Vec<String>>,
    #[serde(rename = "name")]
    pub display_name: String,
    pub email: String,
}

/// FortiFlex API credentials submitted by the user.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCredentials {
    pub username: String,
    pub api_key: String,
    pub serial_number: String,
    pub account_id: String,
}

impl fmt::Debug for VendorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorCredentials")
            .field("username", &self.username)
            .field("api_key", &"[redacted]")
            .field("serial_number", &self.serial_number)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Longest token lifetime accepted from the token endpoint.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

/// Bearer token minted by the FortiFlex token endpoint.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token valid for `expires_in_secs` from now. `None` unless the lifetime
    /// lies within `1..=MAX_TOKEN_LIFETIME_SECS`.
    pub fn new(token: String, expires_in_secs: i64) -> Option<Self> {
        if !(1..=MAX_TOKEN_LIFETIME_SECS).contains(&expires_in_secs) {
            return None;
        }
        let issued_at = Utc::now();
        let expires_at = issued_at.checked_add_signed(Duration::try_seconds(expires_in_secs)?)?;
        Some(Self {
            token,
            issued_at,
            expires_at,
        })
    }

    /// Whether the token can still be handed out at `now`, keeping `margin`
    /// in reserve before expiry. The reserve never exceeds half the token's
    /// lifetime.
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let reserve = margin.min((self.expires_at - self.issued_at) / 2);
        now < self.expires_at - reserve
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[redacted]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Config ID → product type name, derived from a configs listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTypeMapping {
    /// Vendor config ID, kept in its wire form (string or number).
    pub id: serde_json::Value,
    #[serde(rename = "type")]
    pub config_type: Option<String>,
}

/// A stored gateway session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub identity: Option<UserIdentity>,
    pub vendor_credentials: Option<VendorCredentials>,
    pub access_token: Option<AccessToken>,
    pub config_type_cache: Vec<ConfigTypeMapping>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: SessionId, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            identity: None,
            vendor_credentials: None,
            access_token: None,
            config_type_cache: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Restart the absolute lifetime, e.g. after a fresh login.
    pub fn renew(&mut self, ttl_secs: u64) {
        self.expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);
    }

    /// Replace the vendor credentials. A token minted for the previous
    /// credentials is dropped.
    pub fn set_vendor_credentials(&mut self, credentials: VendorCredentials) {
        self.vendor_credentials = Some(credentials);
        self.access_token = None;
    }

    /// Store a freshly minted token. Ignored when the credentials it was
    /// minted for are gone.
    pub fn set_access_token(&mut self, token: AccessToken) -> bool {
        if self.vendor_credentials.is_none() {
            return false;
        }
        self.access_token = Some(token);
        true
    }
}
