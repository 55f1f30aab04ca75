//! Runtime configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional TOML file named by `APPVIRT_CONFIG`, then `APPVIRT_*`
//! environment variables (a `.env` file is loaded first if present).
//!
//! ```toml
//! [bridge]
//! worker_threads = 4
//! unit_timeout_secs = 30
//!
//! [cache]
//! ttl_seconds = 120
//!
//! [sandbox]
//! strict = true
//!
//! [sandbox.services.Drive]
//! methods = ["getFileById", "createFile"]
//! usage_limit = 100
//! cleanup = false
//! resources = [{ matcher = "budget.xlsx", read = true }]
//!
//! [properties]
//! db_path = "appvirt-properties.db"
//! ```

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use appvirt_auth::OAuthConfig;
use appvirt_bridge::BridgeConfig;
use appvirt_sandbox::{SandboxConfig, UsageLimit};
use appvirt_store::CacheConfig;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, RuntimeError};

/// Names the TOML configuration file.
pub const CONFIG_PATH_VAR: &str = "APPVIRT_CONFIG";

/// Token endpoint used when refresh credentials come without one.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const STRICT_SANDBOX_VAR: &str = "APPVIRT_STRICT_SANDBOX";
pub const USAGE_LIMIT_VAR: &str = "APPVIRT_USAGE_LIMIT";
pub const CACHE_ENABLED_VAR: &str = "APPVIRT_CACHE_ENABLED";
pub const CACHE_TTL_VAR: &str = "APPVIRT_CACHE_TTL_SECS";
pub const CACHE_MAX_SCOPES_VAR: &str = "APPVIRT_CACHE_MAX_SCOPES";
pub const BRIDGE_THREADS_VAR: &str = "APPVIRT_BRIDGE_THREADS";
pub const BRIDGE_TIMEOUT_VAR: &str = "APPVIRT_BRIDGE_TIMEOUT_SECS";
pub const PROPERTIES_DB_VAR: &str = "APPVIRT_PROPERTIES_DB";
pub const ACCESS_TOKEN_VAR: &str = "APPVIRT_ACCESS_TOKEN";
pub const CLIENT_ID_VAR: &str = "APPVIRT_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "APPVIRT_CLIENT_SECRET";
pub const REFRESH_TOKEN_VAR: &str = "APPVIRT_REFRESH_TOKEN";
pub const TOKEN_URL_VAR: &str = "APPVIRT_TOKEN_URL";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Everything needed to assemble a [`crate::Runtime`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bridge: BridgeConfig,
    pub cache: CacheConfig,
    pub sandbox: SandboxConfig,
    pub auth: AuthSettings,
    pub properties: PropertiesSettings,
}

/// Credentials for outgoing requests.  A static token wins over refresh
/// credentials when both are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub access_token: Option<String>,
    pub oauth: Option<OAuthConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PropertiesSettings {
    /// SQLite database file.  `None` keeps properties in memory.
    pub db_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl RuntimeConfig {
    /// Load from the process environment: `.env`, then the TOML file named
    /// by `APPVIRT_CONFIG`, then `APPVIRT_*` overrides.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env file");
        }

        let mut config = match env_non_empty(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env_non_empty)?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RuntimeError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading configuration file");
        Self::from_toml_str(&content)
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RuntimeError::config(CONFIG_PATH_VAR, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the variables `lookup` resolves.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Apply `APPVIRT_*` overrides resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strict) = parse_bool(&lookup, STRICT_SANDBOX_VAR)? {
            self.sandbox.strict = strict;
        }
        if let Some(limit) = parse_var::<u64, _>(&lookup, USAGE_LIMIT_VAR)? {
            self.sandbox.defaults.usage_limit = Some(UsageLimit::Total(limit));
            for settings in self.sandbox.services.values_mut() {
                if settings.usage_limit.is_none() {
                    settings.usage_limit = Some(UsageLimit::Total(limit));
                }
            }
        }

        if let Some(enabled) = parse_bool(&lookup, CACHE_ENABLED_VAR)? {
            self.cache.enabled = enabled;
        }
        if let Some(ttl) = parse_var(&lookup, CACHE_TTL_VAR)? {
            self.cache.ttl_seconds = ttl;
        }
        if let Some(max) = parse_var(&lookup, CACHE_MAX_SCOPES_VAR)? {
            self.cache.max_scopes = max;
        }

        if let Some(threads) = parse_var(&lookup, BRIDGE_THREADS_VAR)? {
            self.bridge.worker_threads = threads;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, BRIDGE_TIMEOUT_VAR)? {
            // Zero disables the timeout.
            self.bridge.unit_timeout_secs = (secs > 0).then_some(secs);
        }

        if let Some(path) = lookup(PROPERTIES_DB_VAR) {
            self.properties.db_path = Some(PathBuf::from(path));
        }

        if let Some(token) = lookup(ACCESS_TOKEN_VAR) {
            self.auth.access_token = Some(token);
        }
        self.apply_oauth_env(&lookup);

        self.validate()
    }

    fn apply_oauth_env<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = lookup(CLIENT_ID_VAR);
        let client_secret = lookup(CLIENT_SECRET_VAR);
        let refresh_token = lookup(REFRESH_TOKEN_VAR);
        let token_url = lookup(TOKEN_URL_VAR);
        if client_id.is_none() && client_secret.is_none() && refresh_token.is_none() && token_url.is_none() {
            return;
        }

        let mut oauth = self.auth.oauth.take().unwrap_or_else(|| OAuthConfig {
            client_id: String::new(),
            client_secret: None,
            refresh_token: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scopes: Vec::new(),
        });
        if let Some(id) = client_id {
            oauth.client_id = id;
        }
        if client_secret.is_some() {
            oauth.client_secret = client_secret;
        }
        if let Some(token) = refresh_token {
            oauth.refresh_token = token;
        }
        if let Some(url) = token_url {
            oauth.token_url = url;
        }
        self.auth.oauth = Some(oauth);
    }

    /// Reject values no component could run with.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.worker_threads == 0 {
            return Err(RuntimeError::config(
                "bridge.worker_threads",
                "must be at least 1",
            ));
        }
        if self.cache.enabled && self.cache.max_scopes == 0 {
            return Err(RuntimeError::config("cache.max_scopes", "must be at least 1"));
        }
        if let Some(oauth) = &self.auth.oauth {
            oauth
                .validate()
                .map_err(|e| RuntimeError::config("auth.oauth", e.to_string()))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read a non-empty environment variable, returning `None` if unset or empty.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| RuntimeError::config(key, format!("`{raw}`: {e}")))
        })
        .transpose()
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(RuntimeError::config(key, format!("`{raw}` is not a boolean"))),
    }
}
