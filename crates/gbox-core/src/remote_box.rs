//! Box entity - a client-side handle on one remote sandbox.

use crate::archive::{self, TargetMode, TransferTarget};
use crate::error::{CoreError, Result};
use crate::models::{
    ActionResponse, ArchiveStat, BoxData, BoxId, BoxStatus, CreateBoxParams, DeleteResponse,
    ExecOptions, ExtractArchiveResponse, ReclaimResponse, RunOptions, RunResult,
};
use crate::transport::{cancellable, BoxTransport, ExecProcess};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of [`RemoteBox::copy_from`].
#[derive(Debug, Clone, PartialEq)]
pub enum CopyFromOutput {
    /// No local path was given; the raw tar stream as downloaded.
    Archive(Bytes),
    /// The archive was unpacked under this directory.
    Directory(PathBuf),
    /// The first file entry was written to `path`.
    ///
    /// `entry` is that entry's path inside the archive, `None` when the
    /// archive held no regular file and nothing was written.
    File {
        /// Local destination.
        path: PathBuf,
        /// Archive entry that was written.
        entry: Option<PathBuf>,
    },
}

/// A handle on one remote box.
///
/// The handle owns a snapshot of the box's attributes. The snapshot is
/// refreshed by [`reload`](Self::reload) and after every state-changing
/// action except delete.
///
/// Every remote call takes a [`CancellationToken`]. A cancelled call fails
/// with [`CoreError::Cancelled`] and leaves the snapshot untouched.
pub struct RemoteBox {
    attrs: BoxData,
    transport: Arc<dyn BoxTransport>,
}

impl fmt::Debug for RemoteBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBox")
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl RemoteBox {
    /// Wrap an attribute snapshot the caller already holds.
    pub fn from_data(transport: Arc<dyn BoxTransport>, attrs: BoxData) -> Self {
        Self { attrs, transport }
    }

    /// Fetch an existing box by id.
    pub async fn get(
        transport: Arc<dyn BoxTransport>,
        id: &BoxId,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let attrs = cancellable(cancel, transport.get_details(id.as_str())).await?;
        Ok(Self::from_data(transport, attrs))
    }

    /// Create a new box and return a handle on it.
    pub async fn create(
        transport: Arc<dyn BoxTransport>,
        params: &CreateBoxParams,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let start = std::time::Instant::now();
        tracing::info!(image = %params.image, "Creating box");
        let attrs = cancellable(cancel, transport.create_box(params)).await?;
        tracing::info!(
            box_id = %attrs.id,
            status = %attrs.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Box created"
        );
        Ok(Self::from_data(transport, attrs))
    }

    /// Box identifier.
    pub fn id(&self) -> &BoxId {
        &self.attrs.id
    }

    /// Status as of the last snapshot.
    pub fn status(&self) -> BoxStatus {
        self.attrs.status
    }

    /// Image the box runs.
    pub fn image(&self) -> &str {
        &self.attrs.image
    }

    pub fn labels(&self) -> Option<&HashMap<String, String>> {
        self.attrs.labels.as_ref()
    }

    /// Full attribute snapshot.
    pub fn attrs(&self) -> &BoxData {
        &self.attrs
    }

    /// Refresh the attribute snapshot.
    ///
    /// A box the service no longer knows is not an error: the local status
    /// becomes [`BoxStatus::Deleted`] and the rest of the snapshot is kept.
    pub async fn reload(&mut self, cancel: &CancellationToken) -> Result<()> {
        match cancellable(cancel, self.transport.get_details(self.attrs.id.as_str())).await {
            Ok(attrs) => {
                tracing::trace!(box_id = %self.attrs.id, status = %attrs.status, "Box reloaded");
                self.attrs = attrs;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(box_id = %self.attrs.id, "Box not found on reload, marking deleted");
                self.attrs.status = BoxStatus::Deleted;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Start the box, then reload.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<ActionResponse> {
        tracing::debug!(box_id = %self.attrs.id, "Starting box");
        let response = cancellable(cancel, self.transport.start(self.attrs.id.as_str())).await?;
        self.reload(cancel).await?;
        tracing::info!(box_id = %self.attrs.id, status = %self.attrs.status, "Box started");
        Ok(response)
    }

    /// Stop the box, then reload.
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<ActionResponse> {
        tracing::debug!(box_id = %self.attrs.id, "Stopping box");
        let response = cancellable(cancel, self.transport.stop(self.attrs.id.as_str())).await?;
        self.reload(cancel).await?;
        tracing::info!(box_id = %self.attrs.id, status = %self.attrs.status, "Box stopped");
        Ok(response)
    }

    /// Delete the box.
    ///
    /// Consumes the handle; there is nothing left to reload.
    pub async fn delete(self, force: bool, cancel: &CancellationToken) -> Result<DeleteResponse> {
        tracing::debug!(box_id = %self.attrs.id, force, "Deleting box");
        let response =
            cancellable(cancel, self.transport.delete_box(self.attrs.id.as_str(), force)).await?;
        tracing::info!(box_id = %self.attrs.id, "Box deleted");
        Ok(response)
    }

    /// Ask the service to reclaim the box's resources, then reload.
    pub async fn reclaim(
        &mut self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<ReclaimResponse> {
        tracing::debug!(box_id = %self.attrs.id, force, "Reclaiming box");
        let response =
            cancellable(cancel, self.transport.reclaim(self.attrs.id.as_str(), force)).await?;
        self.reload(cancel).await?;
        tracing::info!(
            box_id = %self.attrs.id,
            stopped = response.stopped_ids.len(),
            deleted = response.deleted_ids.len(),
            "Box reclaimed"
        );
        Ok(response)
    }

    /// Run a command to completion.
    ///
    /// A missing exit code in the response becomes
    /// [`EXIT_CODE_UNKNOWN`](crate::models::EXIT_CODE_UNKNOWN).
    pub async fn run(
        &self,
        command: &[String],
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let start = std::time::Instant::now();
        tracing::debug!(box_id = %self.attrs.id, command = ?command, "Running command");
        let output = cancellable(
            cancel,
            self.transport.run(self.attrs.id.as_str(), command, options),
        )
        .await?;
        let result = RunResult::from(output);
        tracing::debug!(
            box_id = %self.attrs.id,
            exit_code = result.exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command completed"
        );
        Ok(result)
    }

    /// Start an interactive command and stream its output.
    pub async fn exec(
        &self,
        command: &[String],
        options: &ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecProcess> {
        tracing::debug!(box_id = %self.attrs.id, command = ?command, tty = options.tty, "Starting exec session");
        cancellable(
            cancel,
            self.transport.exec(self.attrs.id.as_str(), command, options),
        )
        .await
    }

    /// Metadata of a path inside the box.
    pub async fn stat(&self, path: &str, cancel: &CancellationToken) -> Result<ArchiveStat> {
        cancellable(cancel, self.transport.head_archive(self.attrs.id.as_str(), path)).await
    }

    /// Copy a host file or directory into the box.
    ///
    /// The source is packed into an in-memory tar holding only its base
    /// name and extracted under `target_path`.
    ///
    /// # Arguments
    ///
    /// * `source` - Host path; must exist
    /// * `target_path` - Directory inside the box to extract into
    /// * `cancel` - Cancellation token for the upload
    pub async fn copy_to(
        &self,
        source: impl AsRef<Path>,
        target_path: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractArchiveResponse> {
        let source = source.as_ref().to_path_buf();
        let start = std::time::Instant::now();
        tracing::debug!(
            box_id = %self.attrs.id,
            source = %source.display(),
            target = %target_path,
            "Copying into box"
        );
        let archive = blocking(move || archive::build_archive(&source)).await?;
        let size = archive.len();
        let response = cancellable(
            cancel,
            self.transport
                .extract_archive(self.attrs.id.as_str(), target_path, Bytes::from(archive)),
        )
        .await?;
        tracing::info!(
            box_id = %self.attrs.id,
            target = %target_path,
            archive_bytes = size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Copied into box"
        );
        Ok(response)
    }

    /// Copy a path out of the box.
    ///
    /// Without `local_path` the raw tar stream is returned. Otherwise the
    /// target is classified (see [`archive::resolve_target`]): a directory
    /// target receives the whole archive, a file target receives the first
    /// regular-file entry.
    pub async fn copy_from(
        &self,
        source_path: &str,
        local_path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<CopyFromOutput> {
        let start = std::time::Instant::now();
        let archive = cancellable(
            cancel,
            self.transport.get_archive(self.attrs.id.as_str(), source_path),
        )
        .await?;

        let Some(local_path) = local_path else {
            tracing::debug!(
                box_id = %self.attrs.id,
                source = %source_path,
                archive_bytes = archive.len(),
                "Downloaded archive"
            );
            return Ok(CopyFromOutput::Archive(archive));
        };

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let local_path = local_path.to_path_buf();
        let output = blocking(move || {
            let TransferTarget {
                mode,
                directory,
                path,
            } = archive::resolve_target(&local_path)?;
            match mode {
                TargetMode::Directory => {
                    archive::unpack_into_dir(&archive, &directory)?;
                    Ok(CopyFromOutput::Directory(directory))
                }
                TargetMode::File => {
                    let entry = archive::unpack_first_file(&archive, &path)?;
                    Ok(CopyFromOutput::File { path, entry })
                }
            }
        })
        .await?;

        tracing::info!(
            box_id = %self.attrs.id,
            source = %source_path,
            output = ?output,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Copied out of box"
        );
        Ok(output)
    }
}

/// Run filesystem and tar work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Archive(format!("archive task failed: {e}")))?
}
