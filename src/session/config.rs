//! Session lifetime, storage and cookie settings.

use axum_extra::extract::cookie::{Cookie, SameSite as CookieSameSite};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl From<SameSite> for CookieSameSite {
    fn from(same_site: SameSite) -> Self {
        match same_site {
            SameSite::Strict => CookieSameSite::Strict,
            SameSite::Lax => CookieSameSite::Lax,
            SameSite::None => CookieSameSite::None,
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        })
    }
}

/// Attributes of the browser cookie carrying the session ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Omitted from the cookie when unset, so the browser scopes it to the host.
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    #[serde(default = "default_same_site")]
    pub same_site: SameSite,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            domain: None,
            path: default_cookie_path(),
            secure: true,
            http_only: true,
            same_site: default_same_site(),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Absolute session lifetime; also the cookie `Max-Age`.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    #[serde(default)]
    pub cookie: CookieConfig,

    /// redb file backing the store. Sessions live in memory when unset.
    #[serde(default)]
    pub store_path: Option<String>,

    /// How often expired sessions are evicted.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_same_site() -> SameSite {
    SameSite::Lax
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            cookie: CookieConfig::default(),
            store_path: None,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl SessionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_ttl_secs == 0 {
            return Err("session_ttl_secs must be positive".to_string());
        }

        if self.cleanup_interval_secs == 0 {
            return Err("cleanup_interval_secs must be positive".to_string());
        }

        let name = &self.cookie.name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("Invalid session cookie name: {:?}", name));
        }

        // Browsers drop SameSite=None cookies that are not Secure.
        if self.cookie.same_site == SameSite::None && !self.cookie.secure {
            return Err("SameSite=None requires a Secure cookie".to_string());
        }

        Ok(())
    }

    /// Cookie binding the browser to `session_id`.
    pub fn build_cookie(&self, session_id: &str) -> Cookie<'static> {
        self.render_cookie(session_id.to_string(), self.session_ttl_secs)
    }

    /// Cookie that deletes the session cookie.
    pub fn clear_cookie(&self) -> Cookie<'static> {
        self.render_cookie(String::new(), 0)
    }

    fn render_cookie(&self, value: String, max_age_secs: u64) -> Cookie<'static> {
        let cookie = &self.cookie;
        let max_age = i64::try_from(max_age_secs).unwrap_or(i64::MAX);

        let mut builder = Cookie::build((cookie.name.clone(), value))
            .path(cookie.path.clone())
            .secure(cookie.secure)
            .http_only(cookie.http_only)
            .same_site(cookie.same_site.into())
            .max_age(time::Duration::seconds(max_age));
        if let Some(ref domain) = cookie.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Extract the session cookie value from a `Cookie` request header.
    /// Unparseable pairs are skipped.
    pub fn parse_session_cookie(&self, cookie_header: &str) -> Option<String> {
        Cookie::split_parse(cookie_header)
            .filter_map(Result::ok)
            .find(|c| c.name() == self.cookie.name)
            .map(|c| c.value().to_string())
    }
}

/// Cookie section of the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CookieConfigJson {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub same_site: Option<SameSite>,
}

/// Session section of the JSON config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfigJson {
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub cookie: CookieConfigJson,
    pub store_path: Option<String>,
    pub cleanup_interval_secs: Option<u64>,
}

impl SessionConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut SessionConfig) {
        if let Some(ttl) = self.ttl_secs {
            config.session_ttl_secs = ttl;
        }
        if let Some(ref path) = self.store_path {
            config.store_path = Some(path.clone());
        }
        if let Some(secs) = self.cleanup_interval_secs {
            config.cleanup_interval_secs = secs;
        }

        let cookie = &self.cookie;
        let target = &mut config.cookie;
        if let Some(ref name) = cookie.name {
            target.name = name.clone();
        }
        if let Some(ref domain) = cookie.domain {
            target.domain = Some(domain.clone());
        }
        if let Some(ref path) = cookie.path {
            target.path = path.clone();
        }
        if let Some(secure) = cookie.secure {
            target.secure = secure;
        }
        if let Some(http_only) = cookie.http_only {
            target.http_only = http_only;
        }
        if let Some(same_site) = cookie.same_site {
            target.same_site = same_site;
        }
    }
}
