//! Run bridge: execute a command in a resolved box and normalize the result.

use crate::error::Result;
use crate::models::{BoxId, RunOptions, RunResult};
use crate::transport::{cancellable, BoxTransport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Longest stdin prefix included in log events.
const LOG_INPUT_PREVIEW: usize = 120;

/// Runs commands by box id.
///
/// Adds no retry. Line limits are forwarded to the service and not
/// re-applied here.
#[derive(Clone)]
pub struct RunBridge {
    transport: Arc<dyn BoxTransport>,
}

impl RunBridge {
    pub fn new(transport: Arc<dyn BoxTransport>) -> Self {
        Self { transport }
    }

    /// Run `command` in `box_id` with `input` on stdin.
    ///
    /// `options` supplies working directory and environment; its stdin and
    /// line-limit fields are overridden by the explicit arguments.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        box_id: &BoxId,
        command: &[String],
        input: Option<&str>,
        stdout_limit: Option<u32>,
        stderr_limit: Option<u32>,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let options = RunOptions {
            stdin: input.map(str::to_string),
            stdout_line_limit: stdout_limit,
            stderr_line_limit: stderr_limit,
            ..options
        };

        let start = std::time::Instant::now();
        tracing::debug!(
            box_id = %box_id,
            command = ?command,
            input = %preview(input.unwrap_or_default()),
            "Running command in box"
        );
        let output = cancellable(
            cancel,
            self.transport.run(box_id.as_str(), command, &options),
        )
        .await?;
        let result = RunResult::from(output);
        tracing::info!(
            box_id = %box_id,
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );
        Ok(result)
    }
}

fn preview(input: &str) -> &str {
    match input.char_indices().nth(LOG_INPUT_PREVIEW) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}
