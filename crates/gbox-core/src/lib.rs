//! # gbox-core
//!
//! Client SDK for the GBox sandbox service.
//!
//! This crate creates, reuses and tears down remote boxes (isolated
//! execution environments), runs commands in them, and moves files in and
//! out through uncompressed tar archives.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    gbox-core (client)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   GBoxClient    │────▶│  BoxSelector             │   │
//! │  │ - list_boxes()  │     │  running > stopped > new │   │
//! │  │ - get_box()     │     └──────────────────────────┘   │
//! │  │ - run_in_box()  │     ┌──────────────────────────┐   │
//! │  └─────────────────┘────▶│  RunBridge               │   │
//! │           │              └──────────────────────────┘   │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   RemoteBox     │────▶│  archive (tar codec)     │   │
//! │  │ - start/stop()  │     │  build / resolve / unpack│   │
//! │  │ - run()         │     └──────────────────────────┘   │
//! │  │ - copy_to/from()│                                    │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! │  ┌─────────────────┐                                    │
//! │  │ dyn BoxTransport│  HttpTransport (reqwest + ws)      │
//! │  └─────────────────┘                                    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!                           │ HTTP /api/v1
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                    GBox API server                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use gbox_core::{ClientConfig, GBoxClient, RunOptions, SelectionContext};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> gbox_core::Result<()> {
//! let client = GBoxClient::new(&ClientConfig::from_env())?;
//! let cancel = CancellationToken::new();
//!
//! // Reuse a warm python box, or start/create one
//! let selection = client
//!     .get_or_create_box(&SelectionContext::for_image("python:3.12"), &cancel)
//!     .await?;
//!
//! let result = client
//!     .run_in_box(
//!         &selection.box_id,
//!         &["python3".to_string()],
//!         Some("print('Hello from a box!')"),
//!         Some(100),
//!         Some(100),
//!         RunOptions::default(),
//!         &cancel,
//!     )
//!     .await?;
//! println!("exit={} stdout={}", result.exit_code, result.stdout);
//!
//! // Move files
//! let remote = client.get_box(&selection.box_id, &cancel).await?;
//! remote.copy_to("./data.csv", "/work", &cancel).await?;
//! remote
//!     .copy_from("/work/out.png", Some("./out.png".as_ref()), &cancel)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Every network call takes a [`tokio_util::sync::CancellationToken`].
//! Cancelling aborts the in-flight request and fails the call with
//! [`CoreError::Cancelled`]; remote state already changed is not rolled back.

pub mod archive;
mod bridge;
mod client;
mod config;
mod error;
mod http;
mod models;
mod remote_box;
mod selector;
mod transport;

#[cfg(test)]
mod testing;

pub use bridge::RunBridge;
pub use client::GBoxClient;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use error::{CoreError, Result};
pub use http::HttpTransport;
pub use models::{
    ActionResponse, ArchiveStat, BoxData, BoxId, BoxStatus, BoxSummary, CreateBoxParams,
    DeleteResponse, ExecOptions, ExtractArchiveResponse, ReclaimResponse, RunOptions, RunOutput,
    RunResult, EXIT_CODE_UNKNOWN,
};
pub use remote_box::{CopyFromOutput, RemoteBox};
pub use selector::{BoxSelector, Selection, SelectionContext, SelectionKind};
pub use transport::{cancellable, BoxTransport, ExecOutput, ExecProcess};
