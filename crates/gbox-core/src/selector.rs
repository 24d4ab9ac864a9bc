//! Box selection and reuse policy.
//!
//! Given an optional explicit box id and a desired image, decide which
//! remote box a command should target:
//!
//! 1. An explicit id is used as-is, without any lookup.
//! 2. Otherwise a running box of the image is reused.
//! 3. Failing that, a stopped box of the image is started and reused.
//! 4. Failing that, a new box of the image is created.
//!
//! The session id only tags log events. Callers that need the same box
//! across calls must pass the id returned from the first call.
//!
//! Selection is best-effort under concurrency: two selections racing on
//! the same stopped box may both start it.

use crate::error::{CoreError, Result};
use crate::models::{BoxData, BoxId, BoxStatus, CreateBoxParams};
use crate::remote_box::RemoteBox;
use crate::transport::{cancellable, BoxTransport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a selection should target.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// Explicit box; skips all searching when set.
    pub box_id: Option<BoxId>,
    /// Image to match or create.
    pub image: String,
    /// Caller session, for log correlation only.
    pub session_id: Option<String>,
}

impl SelectionContext {
    /// Select by image alone.
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_box_id(mut self, box_id: Option<BoxId>) -> Self {
        self.box_id = box_id;
        self
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// How the selected box was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Supplied by the caller.
    Explicit,
    /// A running box was reused.
    Running,
    /// A stopped box was started and reused.
    Started,
    /// A new box was created.
    Created,
}

/// Outcome of [`BoxSelector::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Box to target.
    pub box_id: BoxId,
    /// How it was obtained.
    pub kind: SelectionKind,
}

/// Applies the reuse policy against a transport.
#[derive(Clone)]
pub struct BoxSelector {
    transport: Arc<dyn BoxTransport>,
}

impl BoxSelector {
    pub fn new(transport: Arc<dyn BoxTransport>) -> Self {
        Self { transport }
    }

    /// Resolve `ctx` to a box id.
    ///
    /// Listing, start and create failures propagate; a failed start never
    /// falls through to creating a new box.
    pub async fn select(
        &self,
        ctx: &SelectionContext,
        cancel: &CancellationToken,
    ) -> Result<Selection> {
        let session_id = ctx.session_id.as_deref().unwrap_or("-");

        if let Some(box_id) = &ctx.box_id {
            tracing::debug!(box_id = %box_id, session_id, "Using caller-supplied box");
            return Ok(Selection {
                box_id: box_id.clone(),
                kind: SelectionKind::Explicit,
            });
        }

        let start = std::time::Instant::now();
        let boxes = cancellable(cancel, self.transport.list_boxes(Some(&ctx.image))).await?;
        let candidates: Vec<BoxData> = boxes
            .into_iter()
            .filter(|b| b.image == ctx.image)
            .collect();
        tracing::debug!(
            image = %ctx.image,
            session_id,
            candidates = candidates.len(),
            "Listed candidate boxes"
        );

        let selection = if let Some(running) = pick(&candidates, BoxStatus::Running) {
            Selection {
                box_id: running.id.clone(),
                kind: SelectionKind::Running,
            }
        } else if let Some(stopped) = pick(&candidates, BoxStatus::Stopped) {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let mut handle = RemoteBox::from_data(self.transport.clone(), stopped.clone());
            handle.start(cancel).await?;
            Selection {
                box_id: handle.id().clone(),
                kind: SelectionKind::Started,
            }
        } else {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let created = RemoteBox::create(
                self.transport.clone(),
                &CreateBoxParams::with_image(ctx.image.clone()),
                cancel,
            )
            .await?;
            Selection {
                box_id: created.id().clone(),
                kind: SelectionKind::Created,
            }
        };

        tracing::info!(
            box_id = %selection.box_id,
            image = %ctx.image,
            session_id,
            kind = ?selection.kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Box selected"
        );
        Ok(selection)
    }
}

fn pick(candidates: &[BoxData], status: BoxStatus) -> Option<&BoxData> {
    candidates.iter().find(|b| b.status == status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{box_data, FakeTransport};

    fn selector(fake: &Arc<FakeTransport>) -> BoxSelector {
        BoxSelector::new(fake.clone())
    }

    #[tokio::test]
    async fn test_prefers_running_over_stopped() {
        let fake = Arc::new(FakeTransport::with_boxes(vec![
            box_data("stopped", "python:3", BoxStatus::Stopped),
            box_data("running", "python:3", BoxStatus::Running),
        ]));

        let selection = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selection.box_id.as_str(), "running");
        assert_eq!(selection.kind, SelectionKind::Running);
        assert_eq!(fake.count("start"), 0);
        assert_eq!(fake.count("create"), 0);
    }

    #[tokio::test]
    async fn test_starts_stopped_box() {
        let fake = Arc::new(FakeTransport::with_boxes(vec![box_data(
            "stopped",
            "python:3",
            BoxStatus::Stopped,
        )]));

        let selection = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selection.box_id.as_str(), "stopped");
        assert_eq!(selection.kind, SelectionKind::Started);
        assert_eq!(fake.calls(), vec!["list:python:3", "start:stopped", "get:stopped"]);
    }

    #[tokio::test]
    async fn test_creates_when_no_image_match() {
        let fake = Arc::new(FakeTransport::with_boxes(vec![box_data(
            "other",
            "node:20",
            BoxStatus::Running,
        )]));

        let selection = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selection.kind, SelectionKind::Created);
        assert_ne!(selection.box_id.as_str(), "other");
        assert_eq!(fake.calls().last().map(String::as_str), Some("create:python:3"));
    }

    #[tokio::test]
    async fn test_creates_when_candidates_are_deleted() {
        let fake = Arc::new(FakeTransport::with_boxes(vec![box_data(
            "old",
            "python:3",
            BoxStatus::Deleted,
        )]));

        let selection = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selection.kind, SelectionKind::Created);
    }

    #[tokio::test]
    async fn test_box_id_short_circuits_search() {
        let fake = Arc::new(FakeTransport::with_boxes(vec![box_data(
            "running",
            "python:3",
            BoxStatus::Running,
        )]));
        let ctx = SelectionContext::for_image("python:3")
            .with_box_id(Some(BoxId::new("pinned")))
            .with_session_id(Some("session-1".into()));

        let selection = selector(&fake)
            .select(&ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(selection.box_id.as_str(), "pinned");
        assert_eq!(selection.kind, SelectionKind::Explicit);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_session_id_does_not_pin() {
        let fake = Arc::new(FakeTransport::default());
        let sel = selector(&fake);
        let ctx = SelectionContext::for_image("python:3").with_session_id(Some("s".into()));
        let token = CancellationToken::new();

        let first = sel.select(&ctx, &token).await.unwrap();
        fake.remove(first.box_id.as_str());
        let second = sel.select(&ctx, &token).await.unwrap();
        assert_ne!(first.box_id, second.box_id);
        assert_eq!(fake.count("create"), 2);
    }

    #[tokio::test]
    async fn test_start_failure_does_not_fall_through() {
        let fake = Arc::new(FakeTransport::with_boxes(vec![box_data(
            "stopped",
            "python:3",
            BoxStatus::Stopped,
        )]));
        fake.fail("start");

        let err = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Api { status: 500, .. }));
        assert_eq!(fake.count("create"), 0);
    }

    #[tokio::test]
    async fn test_list_failure_propagates() {
        let fake = Arc::new(FakeTransport::default());
        fake.fail("list");

        let result = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(fake.count("create"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_selection_issues_nothing() {
        let fake = Arc::new(FakeTransport::default());
        let token = CancellationToken::new();
        token.cancel();

        let result = selector(&fake)
            .select(&SelectionContext::for_image("python:3"), &token)
            .await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(fake.calls().is_empty());
    }
}
