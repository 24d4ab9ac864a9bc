//! GBoxServer - MCP server that exposes box operations as tools.
//!
//! This module implements ServerHandler manually to expose box listing,
//! code execution, file access and web page fetching as tools. Every tool
//! call runs under the request's cancellation token.

use crate::config::{GBoxMcpConfig, MAX_COMMAND_LENGTH, MAX_INPUT_SIZE_BYTES};
use crate::types::*;

use base64::Engine;
use gbox_core::{
    archive, cancellable, BoxId, CopyFromOutput, CoreError, GBoxClient, RunOptions, RunResult,
    SelectionContext,
};
use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData,
};
use schemars::schema_for;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Header carrying the streamable HTTP session id.
const SESSION_HEADER: &str = "mcp-session-id";

/// Returned instead of file contents above [`MAX_INPUT_SIZE_BYTES`].
const FILE_TOO_LARGE: &str = "[File is too large to display]";

const RUN_TOOL_POLICY: &str = "If no boxId is provided, the system will try to reuse an \
existing box with matching image: a running box first, then a stopped one (which is started), \
otherwise a new box is created. Without boxId, multiple calls may use different boxes. \
To keep using the same box, pass the boxId returned in the result.";

/// Name of the prompt carrying [`MANUAL_TEXT`].
const MANUAL_PROMPT: &str = "gbox-manual";

const MANUAL_TEXT: &str = "# GBox Manual

## Overview
GBox is a set of tools for completing tasks in sandboxed boxes. Every tool runs inside a box, \
never on the host.

## Usage
### run-python
Run a standalone Python script.

### run-typescript
Run a standalone TypeScript program.

### run-bash
Run a standalone bash script.

### read-file
Read a file from a box, for example one written by a script you ran. Pass the boxId from the run result.

### view-by-url
Read a web page as Markdown or HTML.

### browser-open-url
View a web page, PDF or similar in a browser and get screenshots along with the content.

### copy-to-box / copy-from-box
Move files and directories between the host and a box.

### list-boxes
List all boxes to pick the one a tool should run in.
";

/// Interpreter behind a run tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    TypeScript,
    Bash,
}

impl Language {
    fn command(self) -> Vec<String> {
        let parts: &[&str] = match self {
            Self::Python => &["python3"],
            Self::TypeScript => &["npx", "tsx"],
            Self::Bash => &["bash"],
        };
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::Bash => "bash",
        }
    }
}

/// MCP server for GBox operations.
///
/// Cloned per HTTP session; clones share the underlying client.
#[derive(Clone)]
pub struct GBoxServer {
    client: GBoxClient,
    config: GBoxMcpConfig,
}

impl GBoxServer {
    /// Create a server talking to the box service described by `config`.
    pub fn new(config: GBoxMcpConfig) -> Result<Self, CoreError> {
        let client = GBoxClient::new(&config.client)?;
        Ok(Self::with_client(client, config))
    }

    /// Create a server around an existing client.
    pub fn with_client(client: GBoxClient, config: GBoxMcpConfig) -> Self {
        tracing::info!(
            python_image = %config.images.python,
            typescript_image = %config.images.typescript,
            bash_image = %config.images.bash,
            "GBox server configured"
        );
        Self { client, config }
    }

    pub fn config(&self) -> &GBoxMcpConfig {
        &self.config
    }

    pub fn client(&self) -> &GBoxClient {
        &self.client
    }

    fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.config.images.python,
            Language::TypeScript => &self.config.images.typescript,
            Language::Bash => &self.config.images.bash,
        }
    }

    /// Truncate sensitive content for logging.
    fn truncate_for_log(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            return s.to_string();
        }
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes total)", &s[..end], s.len())
    }

    /// Validate input size.
    fn validate_size(content: &str, max_bytes: usize, field_name: &str) -> Result<(), String> {
        if content.len() > max_bytes {
            Err(format!(
                "{} exceeds maximum size ({} bytes > {} bytes)",
                field_name,
                content.len(),
                max_bytes
            ))
        } else {
            Ok(())
        }
    }

    /// Helper to create success result with JSON content
    fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
        match serde_json::to_string_pretty(data) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "JSON serialization error: {e}"
            ))]),
        }
    }

    /// Helper to create error result
    fn error_result(message: impl Into<String>) -> CallToolResult {
        CallToolResult::error(vec![Content::text(message.into())])
    }

    /// Deserialize tool arguments, or explain what is missing.
    fn parse_args<T: DeserializeOwned>(
        args: Option<serde_json::Map<String, serde_json::Value>>,
        missing: &str,
    ) -> Result<T, CallToolResult> {
        match args
            .map(|a| serde_json::from_value(serde_json::Value::Object(a)))
            .transpose()
        {
            Ok(Some(p)) => Ok(p),
            Ok(None) => Err(Self::error_result(missing)),
            Err(e) => Err(Self::error_result(format!("{missing} ({e})"))),
        }
    }

    /// Convert schemars RootSchema to rmcp JsonObject
    fn schema_to_json_object<T: schemars::JsonSchema>(
    ) -> Arc<serde_json::Map<String, serde_json::Value>> {
        let schema = schema_for!(T);
        let json = serde_json::to_value(&schema.schema).unwrap_or_else(|_| serde_json::json!({}));
        match json {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        }
    }

    /// Create an empty schema for tools with no parameters
    fn empty_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::json!("object"));
        map.insert("properties".into(), serde_json::json!({}));
        Arc::new(map)
    }

    /// Session id of a streamable HTTP request, if any.
    fn session_id(context: &RequestContext<RoleServer>) -> Option<String> {
        context
            .extensions
            .get::<axum::http::request::Parts>()
            .and_then(|parts| parts.headers.get(SESSION_HEADER))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    /// Select a box for `language` and run `code` in it.
    async fn run_code(
        &self,
        language: Language,
        code: &str,
        box_id: Option<String>,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(BoxId, RunResult), CoreError> {
        let ctx = SelectionContext::for_image(self.image_for(language))
            .with_box_id(box_id.map(BoxId::from))
            .with_session_id(session_id);
        let selection = self.client.get_or_create_box(&ctx, cancel).await?;
        let result = self
            .client
            .run_in_box(
                &selection.box_id,
                &language.command(),
                Some(code),
                Some(self.config.stdout_line_limit),
                Some(self.config.stderr_line_limit),
                RunOptions::default(),
                cancel,
            )
            .await?;
        Ok((selection.box_id, result))
    }

    /// Fetch the first file under `path` and turn it into tool content.
    async fn read_box_file(
        &self,
        box_id: &BoxId,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Content>, CoreError> {
        let bytes = cancellable(
            cancel,
            self.client.transport().get_archive(box_id.as_str(), path),
        )
        .await?;
        let Some((entry, contents)) = archive::read_first_file(&bytes)? else {
            tracing::warn!(box_id = %box_id, path = %path, "No file entry in archive");
            return Ok(None);
        };
        tracing::debug!(
            box_id = %box_id,
            path = %path,
            entry = %entry.display(),
            size = contents.len(),
            "File read from box"
        );
        Ok(Some(file_content(path, contents)))
    }

    // ========================================================================
    // Tool Implementations
    // ========================================================================

    async fn handle_list_boxes(&self, cancel: &CancellationToken) -> CallToolResult {
        tracing::debug!("Listing boxes");

        match self.client.list_boxes(None, cancel).await {
            Ok(boxes) => {
                let boxes = boxes
                    .into_iter()
                    .map(|b| BoxInfo {
                        id: b.id.to_string(),
                        image: b.image,
                        status: b.status.to_string(),
                    })
                    .collect();
                Self::json_result(&ListBoxesResult { boxes })
            }
            Err(e) => Self::error_result(format!("Failed to list boxes: {e}")),
        }
    }

    async fn handle_run_code(
        &self,
        language: Language,
        args: Option<serde_json::Map<String, serde_json::Value>>,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let params: RunCodeParams = match Self::parse_args(args, "Missing required parameter: code")
        {
            Ok(p) => p,
            Err(result) => return result,
        };

        if let Err(e) = Self::validate_size(&params.code, MAX_INPUT_SIZE_BYTES, "code") {
            return Self::error_result(e);
        }

        // Log with truncated content for security
        tracing::info!(
            language = language.name(),
            box_id = params.box_id.as_deref().unwrap_or("new box"),
            session_id = session_id.as_deref().unwrap_or("-"),
            code = %Self::truncate_for_log(&params.code, 100),
            "Executing code"
        );

        match self
            .run_code(language, &params.code, params.box_id, session_id, cancel)
            .await
        {
            Ok((_, result)) => Self::json_result(&result),
            Err(e) => Self::error_result(format!("Execution failed: {e}")),
        }
    }

    async fn handle_read_file(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let params: ReadFileParams = match Self::parse_args(args, "Missing required parameter: path")
        {
            Ok(p) => p,
            Err(result) => return result,
        };

        let ctx = SelectionContext::for_image(self.image_for(Language::Bash))
            .with_box_id(params.box_id.map(BoxId::from))
            .with_session_id(session_id);
        let box_id = match self.client.get_or_create_box(&ctx, cancel).await {
            Ok(selection) => selection.box_id,
            Err(e) => return Self::error_result(format!("Failed to read file: {e}")),
        };

        tracing::info!(box_id = %box_id, path = %params.path, "Reading file");
        match self.read_box_file(&box_id, &params.path, cancel).await {
            Ok(Some(content)) => CallToolResult::success(vec![content]),
            Ok(None) => Self::error_result(format!("No file found at {}", params.path)),
            Err(e) => Self::error_result(format!("Failed to read file: {e}")),
        }
    }

    async fn handle_view_url(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
        with_screenshots: bool,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let params: ViewUrlParams = match Self::parse_args(args, "Missing required parameter: url")
        {
            Ok(p) => p,
            Err(result) => return result,
        };

        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Self::error_result("Error: URL must start with http:// or https://");
        }
        if let Err(e) = Self::validate_size(&params.url, MAX_COMMAND_LENGTH, "url") {
            return Self::error_result(e);
        }

        let script = if with_screenshots {
            format!("browser_open_url -screenshot {}", shell_quote(&params.url))
        } else {
            format!("view_by_url {}", shell_quote(&params.url))
        };
        tracing::info!(url = %params.url, screenshots = with_screenshots, "Fetching page");

        let (box_id, result) = match self
            .run_code(Language::Bash, &script, None, session_id, cancel)
            .await
        {
            Ok(ran) => ran,
            Err(e) => return Self::error_result(format!("Error: {e}")),
        };

        let fetched: PageFetchOutput = match serde_json::from_str(&result.stdout) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(error = %e, "Page fetcher output is not JSON");
                PageFetchOutput::default()
            }
        };

        let mut content = Vec::new();
        if with_screenshots {
            for shot in &fetched.screenshot_files {
                match self.read_box_file(&box_id, shot, cancel).await {
                    Ok(Some(image)) if image.as_image().is_some() => content.push(image),
                    Ok(_) => tracing::debug!(path = %shot, "Screenshot is not an image, skipped"),
                    Err(e) => tracing::warn!(path = %shot, error = %e, "Failed to read screenshot"),
                }
            }
        }

        let text = match fetched.output_file {
            None => result.stdout,
            Some(ref path) => match self.read_box_file(&box_id, path, cancel).await {
                Ok(Some(page)) => match page.as_text() {
                    Some(html) if html.text == FILE_TOO_LARGE => html.text.clone(),
                    Some(html) => match params.content_type {
                        PageFormat::Html => html.text.clone(),
                        PageFormat::Markdown => match htmd::convert(&html.text) {
                            Ok(markdown) => markdown,
                            Err(e) => {
                                return Self::error_result(format!(
                                    "Error: failed to convert page to markdown: {e}"
                                ))
                            }
                        },
                    },
                    None => result.stdout,
                },
                Ok(None) => result.stdout,
                Err(e) => return Self::error_result(format!("Error: {e}")),
            },
        };
        content.push(Content::text(text));
        CallToolResult::success(content)
    }

    async fn handle_copy_to_box(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let params: CopyToBoxParams = match Self::parse_args(
            args,
            "Missing required parameters: boxId, sourcePath, targetPath",
        ) {
            Ok(p) => p,
            Err(result) => return result,
        };

        let remote = match self.client.get_box(&BoxId::from(params.box_id), cancel).await {
            Ok(remote) => remote,
            Err(e) => return Self::error_result(format!("Failed to copy to box: {e}")),
        };
        match remote
            .copy_to(&params.source_path, &params.target_path, cancel)
            .await
        {
            Ok(response) => Self::json_result(&response),
            Err(e) => Self::error_result(format!("Failed to copy to box: {e}")),
        }
    }

    async fn handle_copy_from_box(
        &self,
        args: Option<serde_json::Map<String, serde_json::Value>>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let params: CopyFromBoxParams = match Self::parse_args(
            args,
            "Missing required parameters: boxId, sourcePath, localPath",
        ) {
            Ok(p) => p,
            Err(result) => return result,
        };

        let remote = match self.client.get_box(&BoxId::from(params.box_id), cancel).await {
            Ok(remote) => remote,
            Err(e) => return Self::error_result(format!("Failed to copy from box: {e}")),
        };
        let output = match remote
            .copy_from(
                &params.source_path,
                Some(Path::new(&params.local_path)),
                cancel,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => return Self::error_result(format!("Failed to copy from box: {e}")),
        };

        let result = match output {
            CopyFromOutput::Directory(dir) => CopyFromBoxResult {
                mode: "directory".into(),
                path: dir.display().to_string(),
                entry: None,
            },
            CopyFromOutput::File { path, entry } => CopyFromBoxResult {
                mode: "file".into(),
                path: path.display().to_string(),
                entry: entry.map(|e| e.display().to_string()),
            },
            CopyFromOutput::Archive(_) => {
                return Self::error_result("Unexpected raw archive for a local copy")
            }
        };
        Self::json_result(&result)
    }

    /// Build the list of available tools
    fn build_tools_list() -> Vec<Tool> {
        vec![
            Tool::new(
                "list-boxes",
                "List all boxes with their id, image and status.",
                Self::empty_schema(),
            ),
            Tool::new(
                "run-python",
                format!(
                    "Run Python code in a box. The code is passed to python3 on stdin. {RUN_TOOL_POLICY} \
                     To read files generated by your program, use the read-file tool with the boxId."
                ),
                Self::schema_to_json_object::<RunCodeParams>(),
            ),
            Tool::new(
                "run-typescript",
                format!("Run TypeScript code in a box with tsx. {RUN_TOOL_POLICY}"),
                Self::schema_to_json_object::<RunCodeParams>(),
            ),
            Tool::new(
                "run-bash",
                format!("Run a bash script in a box. {RUN_TOOL_POLICY}"),
                Self::schema_to_json_object::<RunCodeParams>(),
            ),
            Tool::new(
                "read-file",
                "Read a file from a box. Text files are returned as text, images as image content.",
                Self::schema_to_json_object::<ReadFileParams>(),
            ),
            Tool::new(
                "view-by-url",
                "Fetch and view content from a URL, optionally converting HTML to markdown. \
                 Usually helpful for reading web pages.",
                Self::schema_to_json_object::<ViewUrlParams>(),
            ),
            Tool::new(
                "browser-open-url",
                "Open a URL in a browser inside a box and return screenshots plus the page \
                 content as markdown or HTML.",
                Self::schema_to_json_object::<ViewUrlParams>(),
            ),
            Tool::new(
                "copy-to-box",
                "Copy a file or directory from the host into a box.",
                Self::schema_to_json_object::<CopyToBoxParams>(),
            ),
            Tool::new(
                "copy-from-box",
                "Copy a file or directory from a box to the host.",
                Self::schema_to_json_object::<CopyFromBoxParams>(),
            ),
        ]
    }
}

/// Turn raw file bytes into tool content.
///
/// Images by extension become base64 image content, valid UTF-8 becomes
/// text, anything else base64 text.
fn file_content(path: &str, contents: Vec<u8>) -> Content {
    if contents.len() > MAX_INPUT_SIZE_BYTES {
        return Content::text(FILE_TOO_LARGE);
    }
    let engine = base64::engine::general_purpose::STANDARD;
    if let Some(mime) = image_mime(path) {
        return Content::image(engine.encode(&contents), mime);
    }
    match String::from_utf8(contents) {
        Ok(text) => Content::text(text),
        Err(e) => Content::text(engine.encode(e.into_bytes())),
    }
}

fn image_mime(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

impl ServerHandler for GBoxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "GBox MCP Server - run code and tools in sandboxed boxes. \
                 Use run-python, run-typescript or run-bash for standalone scripts, \
                 read-file to read files a program produced, view-by-url or browser-open-url \
                 to read web pages, and list-boxes to pick a specific box. \
                 Pass the returned boxId to keep working in the same box."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::build_tools_list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        Ok(ListPromptsResult {
            prompts: Self::build_prompts_list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        Self::prompt(&request.name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let session_id = Self::session_id(&context);
        let cancel = context.ct.clone();
        Ok(self
            .dispatch(request.name.as_ref(), request.arguments, session_id, &cancel)
            .await)
    }
}

impl GBoxServer {
    /// Build the list of available prompts
    fn build_prompts_list() -> Vec<Prompt> {
        vec![Prompt::new(
            MANUAL_PROMPT,
            Some("A manual for the GBox tools."),
            None,
        )]
    }

    fn prompt(name: &str) -> Result<GetPromptResult, ErrorData> {
        if name != MANUAL_PROMPT {
            return Err(ErrorData::invalid_params(
                format!("Unknown prompt: {name}"),
                None,
            ));
        }
        Ok(GetPromptResult {
            description: Some("A manual for the GBox tools.".into()),
            messages: vec![PromptMessage::new_text(
                PromptMessageRole::User,
                MANUAL_TEXT,
            )],
        })
    }

    async fn dispatch(
        &self,
        name: &str,
        args: Option<serde_json::Map<String, serde_json::Value>>,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let start = std::time::Instant::now();
        let result = match name {
            "list-boxes" => self.handle_list_boxes(cancel).await,
            "run-python" => {
                self.handle_run_code(Language::Python, args, session_id, cancel)
                    .await
            }
            "run-typescript" => {
                self.handle_run_code(Language::TypeScript, args, session_id, cancel)
                    .await
            }
            "run-bash" => {
                self.handle_run_code(Language::Bash, args, session_id, cancel)
                    .await
            }
            "read-file" => self.handle_read_file(args, session_id, cancel).await,
            "view-by-url" => self.handle_view_url(args, false, session_id, cancel).await,
            "browser-open-url" => self.handle_view_url(args, true, session_id, cancel).await,
            "copy-to-box" => self.handle_copy_to_box(args, cancel).await,
            "copy-from-box" => self.handle_copy_from_box(args, cancel).await,
            _ => Self::error_result(format!("Unknown tool: {name}")),
        };
        tracing::debug!(
            tool = name,
            is_error = result.is_error.unwrap_or(false),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        result
    }
}
