//! Wire and domain types shared by the transport, entity and selector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Exit code reported when the service omits one.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Opaque identifier of a remote box, stable for the box's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxId(String);

impl BoxId {
    /// Wrap a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BoxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for BoxId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for BoxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a box as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxStatus {
    /// Provisioned but never started.
    Created,
    /// Running and able to execute commands.
    Running,
    /// Stopped; can be started again.
    Stopped,
    /// Gone on the remote side (set locally when a reload finds nothing).
    Deleted,
    /// Any status this client does not recognise.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Attribute snapshot of one remote box.
///
/// Replaced wholesale on reload, never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxData {
    /// Box identifier.
    pub id: BoxId,
    /// Status at the time of the snapshot.
    #[serde(default)]
    pub status: BoxStatus,
    /// Image the box was instantiated from.
    #[serde(default)]
    pub image: String,
    /// User labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Time after which the service may reclaim the box.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Listing entries share the detail shape.
pub type BoxSummary = BoxData;

/// Parameters for creating a box.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoxParams {
    /// Image to instantiate.
    pub image: String,
    /// Labels to attach.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Environment variables.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Default working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Entrypoint override.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
}

impl CreateBoxParams {
    /// Params for a plain box of the given image.
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Response to start/stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Whether the action succeeded.
    #[serde(default)]
    pub success: bool,
    /// Service message.
    #[serde(default)]
    pub message: String,
}

/// Response to delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Service message.
    #[serde(default)]
    pub message: String,
}

/// Response to reclaim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimResponse {
    /// Service message.
    #[serde(default)]
    pub message: String,
    /// Boxes stopped by the reclaim.
    #[serde(default)]
    pub stopped_ids: Vec<BoxId>,
    /// Boxes deleted by the reclaim.
    #[serde(default)]
    pub deleted_ids: Vec<BoxId>,
}

/// Summary returned after an archive was extracted inside a box.
///
/// The service's structured response is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractArchiveResponse {
    /// Service message, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Any further fields of the response.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Flat metadata map returned by `stat`.
pub type ArchiveStat = HashMap<String, String>;

/// Options for a synchronous run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Data fed to the process's stdin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Maximum stdout lines to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_line_limit: Option<u32>,
    /// Maximum stderr lines to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_line_limit: Option<u32>,
    /// Working directory inside the box.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Extra environment variables.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Raw run response as sent by the service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    /// Box the command ran in.
    #[serde(default, rename = "box")]
    pub box_data: Option<BoxData>,
    /// Exit code; the service omits it in some cases.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Captured stdout.
    #[serde(default)]
    pub stdout: String,
    /// Captured stderr.
    #[serde(default)]
    pub stderr: String,
}

/// Normalized result of a synchronous run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Exit code, [`EXIT_CODE_UNKNOWN`] when the service did not report one.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Box the command ran in, when reported.
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub box_data: Option<BoxData>,
}

impl RunResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<RunOutput> for RunResult {
    fn from(output: RunOutput) -> Self {
        Self {
            exit_code: output.exit_code.unwrap_or(EXIT_CODE_UNKNOWN),
            stdout: output.stdout,
            stderr: output.stderr,
            box_data: output.box_data,
        }
    }
}

/// Options for an interactive exec session.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Allocate a TTY.
    pub tty: bool,
    /// Working directory inside the box.
    pub working_dir: Option<String>,
}
