//! Transport abstraction over the box service API.
//!
//! The entity, selector and run bridge only talk to the service through
//! [`BoxTransport`]. [`crate::HttpTransport`] is the production
//! implementation; tests plug in an in-memory fake.
//!
//! Cancellation is expressed by dropping the request future, so the trait
//! itself carries no token. Callers wrap each call with [`cancellable`].

use crate::error::{CoreError, Result};
use crate::models::{
    ActionResponse, ArchiveStat, BoxData, CreateBoxParams, DeleteResponse, ExecOptions,
    ExtractArchiveResponse, ReclaimResponse, RunOptions, RunOutput, EXIT_CODE_UNKNOWN,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Remote operations consumed by this crate.
#[async_trait]
pub trait BoxTransport: Send + Sync {
    /// List boxes, optionally filtered by image on the service side.
    async fn list_boxes(&self, image: Option<&str>) -> Result<Vec<BoxData>>;

    /// Create a new box.
    async fn create_box(&self, params: &CreateBoxParams) -> Result<BoxData>;

    /// Fetch the current attributes of a box.
    async fn get_details(&self, id: &str) -> Result<BoxData>;

    /// Start a box.
    async fn start(&self, id: &str) -> Result<ActionResponse>;

    /// Stop a box.
    async fn stop(&self, id: &str) -> Result<ActionResponse>;

    /// Delete a box.
    async fn delete_box(&self, id: &str, force: bool) -> Result<DeleteResponse>;

    /// Reclaim a box's resources.
    async fn reclaim(&self, id: &str, force: bool) -> Result<ReclaimResponse>;

    /// Run a command to completion.
    async fn run(&self, id: &str, command: &[String], options: &RunOptions) -> Result<RunOutput>;

    /// Start an interactive command with streamed output.
    async fn exec(&self, id: &str, command: &[String], options: &ExecOptions)
        -> Result<ExecProcess>;

    /// Extract an uncompressed tar archive into `target_path` inside the box.
    async fn extract_archive(
        &self,
        id: &str,
        target_path: &str,
        archive: Bytes,
    ) -> Result<ExtractArchiveResponse>;

    /// Download `source_path` from the box as an uncompressed tar archive.
    async fn get_archive(&self, id: &str, source_path: &str) -> Result<Bytes>;

    /// Fetch metadata for `path` inside the box.
    async fn head_archive(&self, id: &str, path: &str) -> Result<ArchiveStat>;
}

/// Run `fut` unless `cancel` fires first.
///
/// A token that is already cancelled fails immediately without polling
/// `fut`, so no request is issued.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        result = fut => result,
    }
}

/// A running interactive command.
///
/// Output arrives on the two channels as it is produced. The exit code
/// resolves once the remote side reports it.
///
/// Both channels are bounded. The task reading the socket blocks while
/// either one is full, so a caller that awaits `exit_code` must keep
/// draining `stdout` and `stderr` concurrently, or use [`ExecProcess::wait`],
/// which does both.
#[derive(Debug)]
pub struct ExecProcess {
    /// Standard output chunks.
    pub stdout: mpsc::Receiver<Bytes>,
    /// Standard error chunks.
    pub stderr: mpsc::Receiver<Bytes>,
    /// Exit code of the command.
    pub exit_code: oneshot::Receiver<Result<i32>>,
}

/// Collected output of an interactive command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code ([`EXIT_CODE_UNKNOWN`] if the session closed without one).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecProcess {
    /// Drain both streams and wait for the exit code.
    pub async fn wait(self) -> Result<ExecOutput> {
        let Self {
            mut stdout,
            mut stderr,
            exit_code,
        } = self;

        let drain_out = async {
            let mut buf = Vec::new();
            while let Some(chunk) = stdout.recv().await {
                buf.extend_from_slice(&chunk);
            }
            buf
        };
        let drain_err = async {
            let mut buf = Vec::new();
            while let Some(chunk) = stderr.recv().await {
                buf.extend_from_slice(&chunk);
            }
            buf
        };
        let (out, err) = tokio::join!(drain_out, drain_err);

        let exit_code = exit_code.await.unwrap_or(Ok(EXIT_CODE_UNKNOWN))?;
        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
        })
    }
}
