//! HTTP implementation of [`BoxTransport`].
//!
//! Talks to the box service REST API under `{base_url}/api/v1` using
//! reqwest, and to the exec WebSocket endpoint using tokio-tungstenite.
//! Non-success statuses are mapped onto [`CoreError`]: 404 becomes
//! `NotFound`, 409 becomes `Conflict`, anything else `Api`.

use crate::config::ClientConfig;
use crate::error::{CoreError, Result};
use crate::models::{
    ActionResponse, ArchiveStat, BoxData, CreateBoxParams, DeleteResponse, ExecOptions,
    ExtractArchiveResponse, ReclaimResponse, RunOptions, RunOutput, EXIT_CODE_UNKNOWN,
};
use crate::transport::{BoxTransport, ExecProcess};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Content type of archive payloads.
const TAR_CONTENT_TYPE: &str = "application/x-tar";

/// Stream prefix byte of stdout frames on the exec socket.
const EXEC_STDOUT: u8 = 1;

/// Stream prefix byte of stderr frames on the exec socket.
const EXEC_STDERR: u8 = 2;

/// Buffered chunks per exec output stream.
const EXEC_CHANNEL_CAPACITY: usize = 64;

/// reqwest-backed client for the box service.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    /// Create a transport from a validated configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let api_url = Url::parse(&config.api_url())
            .map_err(|e| CoreError::Config(format!("invalid base_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(api_url = %api_url, authenticated = config.api_key.is_some(), "HTTP transport created");
        Ok(Self {
            client,
            api_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Build `{api_url}/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| CoreError::Config(format!("base_url cannot be a base: {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let url = self.url(segments)?;
        tracing::debug!(method = %method, url = %url, "Requesting");
        let mut req = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        Ok(req)
    }

    /// Send a request, turning transport failures and error statuses into [`CoreError`].
    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = req.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Request failed before a response arrived");
            CoreError::Generic(e.to_string())
        })?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), url = %response.url(), "Response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::Generic(format!("failed to read response body: {e}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| CoreError::Generic(format!("malformed response: {e}")))
    }

    /// Like [`Self::json`] but an empty body yields `T::default()`.
    async fn json_or_default<T: DeserializeOwned + Default>(&self, req: RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::Generic(format!("failed to read response body: {e}")))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&body)
            .map_err(|e| CoreError::Generic(format!("malformed response: {e}")))
    }

    fn exec_url(&self, id: &str, command: &[String], options: &ExecOptions) -> Result<Url> {
        let mut url = self.url(&["boxes", id, "exec", "ws"])?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| CoreError::Config(format!("cannot derive websocket URL from {url}")))?;
        {
            let mut query = url.query_pairs_mut();
            for part in command {
                query.append_pair("cmd", part);
            }
            query.append_pair("tty", if options.tty { "true" } else { "false" });
            if let Some(ref dir) = options.working_dir {
                query.append_pair("workingDir", dir);
            }
        }
        Ok(url)
    }
}

/// Map an error status and body to the error taxonomy.
///
/// The JSON `message` field is preferred over the raw body when present.
/// [`CoreError::Api`] keeps the raw body alongside it.
fn status_error(status: StatusCode, body: String) -> CoreError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.clone());

    match status {
        StatusCode::NOT_FOUND => {
            tracing::debug!(message = %message, "Request failed (not found)");
            CoreError::NotFound(message)
        }
        StatusCode::CONFLICT => {
            tracing::warn!(message = %message, "Request failed (conflict)");
            CoreError::Conflict(message)
        }
        _ => {
            tracing::error!(status = status.as_u16(), message = %message, "Request failed");
            CoreError::Api {
                status: status.as_u16(),
                message,
                body,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListBoxesResponse {
    #[serde(default)]
    boxes: Vec<BoxData>,
}

#[derive(Debug, Serialize)]
struct ForceRequest {
    force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    cmd: &'a [String],
    #[serde(flatten)]
    options: &'a RunOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExitFrame {
    exit_code: i32,
}

#[async_trait]
impl BoxTransport for HttpTransport {
    async fn list_boxes(&self, image: Option<&str>) -> Result<Vec<BoxData>> {
        let mut req = self.request(Method::GET, &["boxes"])?;
        if let Some(image) = image {
            req = req.query(&[("image", image)]);
        }
        let resp: ListBoxesResponse = self.json(req).await?;
        tracing::trace!(count = resp.boxes.len(), "Boxes listed");
        Ok(resp.boxes)
    }

    async fn create_box(&self, params: &CreateBoxParams) -> Result<BoxData> {
        let req = self.request(Method::POST, &["boxes"])?.json(params);
        self.json(req).await
    }

    async fn get_details(&self, id: &str) -> Result<BoxData> {
        let req = self.request(Method::GET, &["boxes", id])?;
        self.json(req).await
    }

    async fn start(&self, id: &str) -> Result<ActionResponse> {
        let req = self.request(Method::POST, &["boxes", id, "start"])?;
        self.json_or_default(req).await
    }

    async fn stop(&self, id: &str) -> Result<ActionResponse> {
        let req = self.request(Method::POST, &["boxes", id, "stop"])?;
        self.json_or_default(req).await
    }

    async fn delete_box(&self, id: &str, force: bool) -> Result<DeleteResponse> {
        let req = self
            .request(Method::DELETE, &["boxes", id])?
            .json(&ForceRequest { force });
        self.json_or_default(req).await
    }

    async fn reclaim(&self, id: &str, force: bool) -> Result<ReclaimResponse> {
        let req = self
            .request(Method::POST, &["boxes", id, "reclaim"])?
            .json(&ForceRequest { force });
        self.json_or_default(req).await
    }

    async fn run(&self, id: &str, command: &[String], options: &RunOptions) -> Result<RunOutput> {
        let req = self
            .request(Method::POST, &["boxes", id, "run"])?
            .json(&RunRequest {
                cmd: command,
                options,
            });
        self.json(req).await
    }

    async fn exec(
        &self,
        id: &str,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecProcess> {
        let url = self.exec_url(id, command, options)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CoreError::Generic(format!("invalid exec request: {e}")))?;
        if let Some(ref key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| CoreError::Config(format!("invalid api key: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!(box_id = %id, url = %url, "Opening exec session");
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(resp) => {
                    let status = StatusCode::from_u16(resp.status().as_u16())
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    let body = resp
                        .body()
                        .as_ref()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_default();
                    status_error(status, body)
                }
                other => CoreError::Generic(format!("exec connection failed: {other}")),
            })?;

        let (out_tx, out_rx) = mpsc::channel(EXEC_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(EXEC_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let box_id = id.to_string();

        tokio::spawn(async move {
            let mut ws = ws;
            let mut exit_code = None;
            while let Some(message) = ws.next().await {
                match message {
                    Ok(WsMessage::Binary(data)) => match decode_exec_frame(&data) {
                        Some((EXEC_STDERR, payload)) => {
                            let _ = err_tx.send(Bytes::copy_from_slice(payload)).await;
                        }
                        Some((_, payload)) => {
                            let _ = out_tx.send(Bytes::copy_from_slice(payload)).await;
                        }
                        None => {}
                    },
                    Ok(WsMessage::Text(text)) => {
                        if let Ok(frame) = serde_json::from_str::<ExitFrame>(&text) {
                            exit_code = Some(frame.exit_code);
                            break;
                        }
                        tracing::trace!(box_id = %box_id, text = %text, "Ignoring exec text frame");
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(box_id = %box_id, error = %e, "Exec session failed");
                        let _ = exit_tx.send(Err(CoreError::Generic(e.to_string())));
                        return;
                    }
                }
            }
            let _ = ws.close(None).await;
            let code = exit_code.unwrap_or(EXIT_CODE_UNKNOWN);
            tracing::debug!(box_id = %box_id, exit_code = code, "Exec session finished");
            let _ = exit_tx.send(Ok(code));
        });

        Ok(ExecProcess {
            stdout: out_rx,
            stderr: err_rx,
            exit_code: exit_rx,
        })
    }

    async fn extract_archive(
        &self,
        id: &str,
        target_path: &str,
        archive: Bytes,
    ) -> Result<ExtractArchiveResponse> {
        tracing::debug!(box_id = %id, target = %target_path, size = archive.len(), "Uploading archive");
        let req = self
            .request(Method::PUT, &["boxes", id, "archive"])?
            .query(&[("path", target_path)])
            .header(CONTENT_TYPE, TAR_CONTENT_TYPE)
            .body(archive);
        self.json_or_default(req).await
    }

    async fn get_archive(&self, id: &str, source_path: &str) -> Result<Bytes> {
        let req = self
            .request(Method::GET, &["boxes", id, "archive"])?
            .query(&[("path", source_path)])
            .header(ACCEPT, TAR_CONTENT_TYPE);
        let response = self.send(req).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::Generic(format!("failed to read archive: {e}")))?;
        tracing::debug!(box_id = %id, source = %source_path, size = body.len(), "Archive downloaded");
        Ok(body)
    }

    async fn head_archive(&self, id: &str, path: &str) -> Result<ArchiveStat> {
        let req = self
            .request(Method::HEAD, &["boxes", id, "archive"])?
            .query(&[("path", path)]);
        let response = self.send(req).await?;

        let mut stat = ArchiveStat::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            stat.entry(name.as_str().to_ascii_lowercase())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        Ok(stat)
    }
}

/// Split an exec output frame into its stream byte and payload.
fn decode_exec_frame(data: &[u8]) -> Option<(u8, &[u8])> {
    match data.split_first() {
        Some((&stream @ (EXEC_STDOUT | EXEC_STDERR), payload)) => Some((stream, payload)),
        _ => None,
    }
}
