use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub const ENV_URL: &str = "KILN_URL";
pub const ENV_ANON_KEY: &str = "KILN_ANON_KEY";
pub const ENV_SESSION_PATH: &str = "KILN_SESSION_PATH";

/// Connection settings for one hosted backend project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Project base URL, e.g. `https://plant-ops.example.co`
    pub url: String,
    /// Public (anonymous) API key, sent on every request
    pub anon_key: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Realtime endpoint; derived from `url` when unset
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default = "default_join_timeout")]
    pub join_timeout: Duration,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    /// Where the session is persisted between restarts. `None` keeps it in memory only.
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

fn default_schema() -> String { DEFAULT_SCHEMA.to_string() }
fn default_request_timeout() -> Duration { Duration::from_secs(30) }
fn default_join_timeout() -> Duration { Duration::from_secs(10) }
fn default_heartbeat_interval() -> Duration { Duration::from_secs(25) }
fn default_page_size() -> usize { DEFAULT_PAGE_SIZE }

impl ClientConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            schema: default_schema(),
            request_timeout: default_request_timeout(),
            realtime_url: None,
            join_timeout: default_join_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            session_path: None,
            default_page_size: default_page_size(),
        }
    }

    /// Read `KILN_URL`, `KILN_ANON_KEY` and optionally `KILN_SESSION_PATH`
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var(ENV_URL).map_err(|_| ConfigError::MissingEnv(ENV_URL))?;
        let anon_key = std::env::var(ENV_ANON_KEY).map_err(|_| ConfigError::MissingEnv(ENV_ANON_KEY))?;
        let mut config = Self::new(url, anon_key);
        config.session_path = std::env::var_os(ENV_SESSION_PATH).map(PathBuf::from);
        config.validate()?;
        Ok(config)
    }

    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!("{}: expected http or https", self.url)));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ConfigError::MissingKey);
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::Invalid("default_page_size must be positive".into()));
        }
        Ok(())
    }

    fn base(&self) -> &str { self.url.trim_end_matches('/') }

    pub fn rest_url(&self) -> String { format!("{}/rest/v1", self.base()) }

    pub fn auth_url(&self) -> String { format!("{}/auth/v1", self.base()) }

    pub fn storage_url(&self) -> String { format!("{}/storage/v1", self.base()) }

    /// Realtime base URL, `ws(s)://<host>/realtime/v1` unless configured explicitly
    pub fn realtime_url(&self) -> String {
        if let Some(url) = &self.realtime_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.base() {
            u if u.starts_with("http://") => format!("ws://{}/realtime/v1", &u[7..]),
            u if u.starts_with("https://") => format!("wss://{}/realtime/v1", &u[8..]),
            u => format!("wss://{}/realtime/v1", u),
        }
    }
}
