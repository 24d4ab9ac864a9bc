//! Configuration for the MCP server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use gbox_core::{ClientConfig, CoreError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Maximum size for code/content input in bytes (10 MB).
pub const MAX_INPUT_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum command length in characters.
pub const MAX_COMMAND_LENGTH: usize = 1024 * 1024; // 1 MB

/// Default stdout/stderr line limit for run tools.
pub const DEFAULT_LINE_LIMIT: u32 = 100;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Stdio only (for local AI tools)
    Stdio,
    /// Streamable HTTP only (for remote AI agents)
    Http,
    /// Both stdio and HTTP
    #[default]
    Both,
}

impl TransportMode {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stdio" => Self::Stdio,
            "http" | "sse" | "remote" => Self::Http,
            _ => Self::Both,
        }
    }

    /// Check if stdio transport should be enabled.
    pub fn stdio_enabled(&self) -> bool {
        matches!(self, Self::Stdio | Self::Both)
    }

    /// Check if HTTP transport should be enabled.
    pub fn http_enabled(&self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

/// Box images used by the run tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    /// Image for `run-python`.
    pub python: String,
    /// Image for `run-typescript`.
    pub typescript: String,
    /// Image for `run-bash`, `read-file` and the browser tools.
    pub bash: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python: "babelcloud/gbox-python:latest".into(),
            typescript: "babelcloud/gbox-typescript:latest".into(),
            bash: "babelcloud/gbox-playwright:latest".into(),
        }
    }
}

/// Configuration for the GBox MCP server.
#[derive(Debug, Clone)]
pub struct GBoxMcpConfig {
    /// Connection to the box service.
    pub client: ClientConfig,

    /// Images per tool family.
    pub images: ImageConfig,

    /// Stdout lines returned by run tools (default: 100).
    pub stdout_line_limit: u32,

    /// Stderr lines returned by run tools (default: 100).
    pub stderr_line_limit: u32,

    /// Transport mode (default: both stdio and HTTP).
    pub transport_mode: TransportMode,

    /// HTTP server bind address.
    pub http_addr: SocketAddr,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid box service connection: {0}")]
    Client(#[from] CoreError),

    #[error("image for {0} is empty")]
    EmptyImage(&'static str),
}

impl Default for GBoxMcpConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            images: ImageConfig::default(),
            stdout_line_limit: DEFAULT_LINE_LIMIT,
            stderr_line_limit: DEFAULT_LINE_LIMIT,
            transport_mode: TransportMode::Both,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8090),
        }
    }
}

impl GBoxMcpConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GBOX_BASE_URL` | `http://localhost:28080` |
    /// | `GBOX_API_KEY` | unset |
    /// | `GBOX_TIMEOUT_SECS` | `60` |
    /// | `GBOX_PYTHON_IMAGE` | `babelcloud/gbox-python:latest` |
    /// | `GBOX_TYPESCRIPT_IMAGE` | `babelcloud/gbox-typescript:latest` |
    /// | `GBOX_BASH_IMAGE` | `babelcloud/gbox-playwright:latest` |
    /// | `GBOX_STDOUT_LINE_LIMIT` | `100` |
    /// | `GBOX_STDERR_LINE_LIMIT` | `100` |
    /// | `GBOX_TRANSPORT` | `both` (stdio, http, both) |
    /// | `GBOX_HTTP_HOST` | `0.0.0.0` |
    /// | `GBOX_HTTP_PORT` | `8090` |
    pub fn from_env() -> Self {
        let default = Self::default();

        let http_host: IpAddr = std::env::var("GBOX_HTTP_HOST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.ip());

        let http_port: u16 = std::env::var("GBOX_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.port());

        Self {
            client: ClientConfig::from_env(),
            images: ImageConfig {
                python: std::env::var("GBOX_PYTHON_IMAGE").unwrap_or(default.images.python),
                typescript: std::env::var("GBOX_TYPESCRIPT_IMAGE")
                    .unwrap_or(default.images.typescript),
                bash: std::env::var("GBOX_BASH_IMAGE").unwrap_or(default.images.bash),
            },
            stdout_line_limit: std::env::var("GBOX_STDOUT_LINE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.stdout_line_limit),
            stderr_line_limit: std::env::var("GBOX_STDERR_LINE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.stderr_line_limit),
            transport_mode: std::env::var("GBOX_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(default.transport_mode),
            http_addr: SocketAddr::new(http_host, http_port),
        }
    }

    /// Validate the connection settings and images.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        for (tool, image) in [
            ("python", &self.images.python),
            ("typescript", &self.images.typescript),
            ("bash", &self.images.bash),
        ] {
            if image.trim().is_empty() {
                return Err(ConfigError::EmptyImage(tool));
            }
        }
        Ok(())
    }
}
