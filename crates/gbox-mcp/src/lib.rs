//! MCP server exposing GBox sandboxes as tools.
//!
//! Tools run code, read files and fetch web pages inside boxes managed by
//! [`gbox_core`]. The server speaks MCP over stdio, streamable HTTP, or
//! both (see [`TransportMode`]).

pub mod config;
pub mod http;
pub mod server;
pub mod types;

pub use config::{ConfigError, GBoxMcpConfig, ImageConfig, TransportMode};
pub use server::GBoxServer;
