//! Top-level client tying the transport, entity, selector and run bridge together.

use crate::bridge::RunBridge;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::HttpTransport;
use crate::models::{BoxId, BoxSummary, CreateBoxParams, RunOptions, RunResult};
use crate::remote_box::RemoteBox;
use crate::selector::{BoxSelector, Selection, SelectionContext};
use crate::transport::{cancellable, BoxTransport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry point of the SDK.
///
/// Cheap to clone; clones share one transport.
#[derive(Clone)]
pub struct GBoxClient {
    transport: Arc<dyn BoxTransport>,
    selector: BoxSelector,
    bridge: RunBridge,
}

impl GBoxClient {
    /// Connect over HTTP using `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        tracing::info!(base_url = %config.base_url, "GBox client created");
        Ok(Self::with_transport(Arc::new(transport)))
    }

    /// Use an existing transport.
    pub fn with_transport(transport: Arc<dyn BoxTransport>) -> Self {
        Self {
            selector: BoxSelector::new(transport.clone()),
            bridge: RunBridge::new(transport.clone()),
            transport,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn BoxTransport> {
        &self.transport
    }

    /// List boxes, optionally only those of `image`.
    pub async fn list_boxes(
        &self,
        image: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<BoxSummary>> {
        let boxes = cancellable(cancel, self.transport.list_boxes(image)).await?;
        tracing::debug!(count = boxes.len(), image = image.unwrap_or("*"), "Listed boxes");
        Ok(boxes)
    }

    /// Fetch a handle on an existing box.
    pub async fn get_box(&self, id: &BoxId, cancel: &CancellationToken) -> Result<RemoteBox> {
        RemoteBox::get(self.transport.clone(), id, cancel).await
    }

    /// Create a new box.
    pub async fn create_box(
        &self,
        params: &CreateBoxParams,
        cancel: &CancellationToken,
    ) -> Result<RemoteBox> {
        RemoteBox::create(self.transport.clone(), params, cancel).await
    }

    /// Resolve a box per the reuse policy (see [`BoxSelector`]).
    pub async fn get_or_create_box(
        &self,
        ctx: &SelectionContext,
        cancel: &CancellationToken,
    ) -> Result<Selection> {
        self.selector.select(ctx, cancel).await
    }

    /// Run a command in a box by id (see [`RunBridge::run`]).
    #[allow(clippy::too_many_arguments)]
    pub async fn run_in_box(
        &self,
        box_id: &BoxId,
        command: &[String],
        input: Option<&str>,
        stdout_limit: Option<u32>,
        stderr_limit: Option<u32>,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        self.bridge
            .run(
                box_id,
                command,
                input,
                stdout_limit,
                stderr_limit,
                options,
                cancel,
            )
            .await
    }
}
