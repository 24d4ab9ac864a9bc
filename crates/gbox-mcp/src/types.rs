//! Tool parameter and response types for MCP tools.
//!
//! These types use serde for serialization and schemars for automatic
//! JSON Schema generation required by MCP. Field names are camelCase on the
//! wire.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Boxes
// ============================================================================

/// Result of listing boxes.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListBoxesResult {
    /// All boxes known to the service.
    pub boxes: Vec<BoxInfo>,
}

/// Information about a box.
#[derive(Debug, Serialize, JsonSchema)]
pub struct BoxInfo {
    /// Box identifier.
    pub id: String,
    /// Image the box runs.
    pub image: String,
    /// Current status.
    pub status: String,
}

// ============================================================================
// Code Execution
// ============================================================================

/// Parameters for the run-python, run-typescript and run-bash tools.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCodeParams {
    /// Code to execute, fed to the interpreter on stdin.
    pub code: String,

    /// The ID of an existing box to run the code in.
    ///
    /// Without it an existing box with a matching image is reused or a new
    /// one is created, so separate calls may land in different boxes.
    #[serde(default)]
    pub box_id: Option<String>,
}

// ============================================================================
// File Operations
// ============================================================================

/// Parameters for reading a file.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileParams {
    /// Absolute path of the file inside the box.
    pub path: String,

    /// Box to read from; a box is selected when omitted.
    #[serde(default)]
    pub box_id: Option<String>,
}

/// Parameters for copying a host path into a box.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyToBoxParams {
    /// Box to copy into.
    pub box_id: String,

    /// Host file or directory to copy.
    pub source_path: String,

    /// Directory inside the box to extract into.
    pub target_path: String,
}

/// Parameters for copying a box path to the host.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyFromBoxParams {
    /// Box to copy from.
    pub box_id: String,

    /// File or directory inside the box.
    pub source_path: String,

    /// Host destination. A trailing separator or an existing directory
    /// means "extract into this directory".
    pub local_path: String,
}

/// Result of a copy-from-box call.
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyFromBoxResult {
    /// `file` or `directory`.
    pub mode: String,
    /// Host path written to.
    pub path: String,
    /// Archive entry written for a file target; absent when the archive
    /// contained no regular file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

// ============================================================================
// Web Pages
// ============================================================================

/// Output format for fetched pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    /// Convert HTML to Markdown.
    #[default]
    Markdown,
    /// Return the HTML unchanged.
    Html,
}

/// Parameters for view-by-url and browser-open-url.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewUrlParams {
    /// The URL to fetch content from (must start with http:// or https://).
    pub url: String,

    /// The desired output format: 'markdown' or 'html' (defaults to 'markdown').
    #[serde(default)]
    pub content_type: PageFormat,
}

/// Stdout JSON printed by the in-box page fetchers.
#[derive(Debug, Default, Deserialize)]
pub struct PageFetchOutput {
    /// Saved page content.
    #[serde(default)]
    pub output_file: Option<String>,
    /// Saved screenshots.
    #[serde(default)]
    pub screenshot_files: Vec<String>,
}
