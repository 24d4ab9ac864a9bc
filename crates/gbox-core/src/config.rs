//! Client configuration types.

use crate::error::CoreError;
use std::time::Duration;

/// Default API server address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:28080";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for connecting to the box service.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the API server (without the `/api/v1` suffix).
    pub base_url: String,
    /// API key sent as a bearer token, if any.
    pub api_key: Option<String>,
    /// Timeout applied to every HTTP request.
    pub timeout: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GBOX_BASE_URL` | `http://localhost:28080` |
    /// | `GBOX_API_KEY` | unset |
    /// | `GBOX_TIMEOUT_SECS` | `60` |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            base_url: std::env::var("GBOX_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default.base_url),
            api_key: std::env::var("GBOX_API_KEY").ok().filter(|v| !v.is_empty()),
            timeout: std::env::var("GBOX_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.timeout),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.base_url.is_empty() {
            return Err(CoreError::Config("base_url is required".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(CoreError::Config(format!(
                "base_url must start with http:// or https://, got {}",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(CoreError::Config("timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Base URL of the versioned API (`{base_url}/api/v1`).
    pub fn api_url(&self) -> String {
        format!("{}/api/v1", self.base_url.trim_end_matches('/'))
    }
}

/// Builder for ClientConfig.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the API server base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<ClientConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
