//! In-memory [`BoxTransport`] used by unit tests.

use crate::error::{CoreError, Result};
use crate::models::{
    ActionResponse, ArchiveStat, BoxData, BoxId, BoxStatus, CreateBoxParams, DeleteResponse,
    ExecOptions, ExtractArchiveResponse, ReclaimResponse, RunOptions, RunOutput,
};
use crate::transport::{BoxTransport, ExecProcess};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct State {
    boxes: Vec<BoxData>,
    calls: Vec<String>,
    files: HashMap<(String, String), Vec<u8>>,
    run_output: RunOutput,
    last_run: Option<(Vec<String>, RunOptions)>,
    failing: HashSet<&'static str>,
    stalling: HashSet<&'static str>,
    next_id: u32,
}

/// Scriptable fake of the box service.
#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Mutex<State>,
}

pub(crate) fn box_data(id: &str, image: &str, status: BoxStatus) -> BoxData {
    BoxData {
        id: BoxId::new(id),
        status,
        image: image.to_string(),
        labels: None,
        created_at: None,
        expires_at: None,
    }
}

impl FakeTransport {
    pub(crate) fn with_boxes(boxes: Vec<BoxData>) -> Self {
        let fake = Self::default();
        fake.lock().boxes = boxes;
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Every call so far, as `op` or `op:arg`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    pub(crate) fn fail(&self, op: &'static str) {
        self.lock().failing.insert(op);
    }

    pub(crate) fn stall(&self, op: &'static str) {
        self.lock().stalling.insert(op);
    }

    pub(crate) fn set_run_output(&self, output: RunOutput) {
        self.lock().run_output = output;
    }

    pub(crate) fn last_run(&self) -> Option<(Vec<String>, RunOptions)> {
        self.lock().last_run.clone()
    }

    pub(crate) fn remove(&self, id: &str) {
        self.lock().boxes.retain(|b| b.id.as_str() != id);
    }

    pub(crate) fn put_file(&self, id: &str, path: &str, contents: &[u8]) {
        self.lock()
            .files
            .insert((id.to_string(), path.to_string()), contents.to_vec());
    }

    pub(crate) fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&(id.to_string(), path.to_string()))
            .cloned()
    }

    /// Record the call, then apply scripted failure or stall.
    async fn enter(&self, op: &'static str, arg: &str) -> Result<()> {
        let (fail, stall) = {
            let mut state = self.lock();
            state.calls.push(if arg.is_empty() {
                op.to_string()
            } else {
                format!("{op}:{arg}")
            });
            (state.failing.contains(op), state.stalling.contains(op))
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            let message = format!("injected {op} failure");
            return Err(CoreError::Api {
                status: 500,
                body: message.clone(),
                message,
            });
        }
        Ok(())
    }

    fn update(&self, id: &str, status: BoxStatus) -> Result<()> {
        let mut state = self.lock();
        let b = state
            .boxes
            .iter_mut()
            .find(|b| b.id.as_str() == id)
            .ok_or_else(|| CoreError::NotFound(format!("box {id} not found")))?;
        b.status = status;
        Ok(())
    }
}

#[async_trait]
impl BoxTransport for FakeTransport {
    async fn list_boxes(&self, image: Option<&str>) -> Result<Vec<BoxData>> {
        self.enter("list", image.unwrap_or_default()).await?;
        Ok(self
            .lock()
            .boxes
            .iter()
            .filter(|b| image.map_or(true, |i| b.image == i))
            .cloned()
            .collect())
    }

    async fn create_box(&self, params: &CreateBoxParams) -> Result<BoxData> {
        self.enter("create", &params.image).await?;
        let mut state = self.lock();
        state.next_id += 1;
        let data = box_data(
            &format!("new-{}", state.next_id),
            &params.image,
            BoxStatus::Running,
        );
        state.boxes.push(data.clone());
        Ok(data)
    }

    async fn get_details(&self, id: &str) -> Result<BoxData> {
        self.enter("get", id).await?;
        self.lock()
            .boxes
            .iter()
            .find(|b| b.id.as_str() == id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("box {id} not found")))
    }

    async fn start(&self, id: &str) -> Result<ActionResponse> {
        self.enter("start", id).await?;
        self.update(id, BoxStatus::Running)?;
        Ok(ActionResponse {
            success: true,
            message: "started".into(),
        })
    }

    async fn stop(&self, id: &str) -> Result<ActionResponse> {
        self.enter("stop", id).await?;
        self.update(id, BoxStatus::Stopped)?;
        Ok(ActionResponse {
            success: true,
            message: "stopped".into(),
        })
    }

    async fn delete_box(&self, id: &str, force: bool) -> Result<DeleteResponse> {
        self.enter("delete", id).await?;
        let existed = {
            let mut state = self.lock();
            let before = state.boxes.len();
            state.boxes.retain(|b| b.id.as_str() != id);
            before != state.boxes.len()
        };
        if !existed {
            return Err(CoreError::NotFound(format!("box {id} not found")));
        }
        Ok(DeleteResponse {
            message: format!("deleted (force={force})"),
        })
    }

    async fn reclaim(&self, id: &str, _force: bool) -> Result<ReclaimResponse> {
        self.enter("reclaim", id).await?;
        self.update(id, BoxStatus::Stopped)?;
        Ok(ReclaimResponse {
            message: "reclaimed".into(),
            stopped_ids: vec![BoxId::new(id)],
            deleted_ids: Vec::new(),
        })
    }

    async fn run(&self, id: &str, command: &[String], options: &RunOptions) -> Result<RunOutput> {
        self.enter("run", id).await?;
        let mut state = self.lock();
        state.last_run = Some((command.to_vec(), options.clone()));
        Ok(state.run_output.clone())
    }

    async fn exec(
        &self,
        id: &str,
        _command: &[String],
        _options: &ExecOptions,
    ) -> Result<ExecProcess> {
        self.enter("exec", id).await?;
        let (out_tx, out_rx) = mpsc::channel(4);
        let (_, err_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = oneshot::channel();
        let stdout = self.lock().run_output.stdout.clone();
        tokio::spawn(async move {
            let _ = out_tx.send(Bytes::from(stdout)).await;
            let _ = exit_tx.send(Ok(0));
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
        self.enter("extract", target_path).await?;
        let mut tar = tar::Archive::new(Cursor::new(archive));
        let mut count = 0;
        let bad_request = |e: std::io::Error| CoreError::Api {
            status: 400,
            message: e.to_string(),
            body: e.to_string(),
        };
        for entry in tar.entries().map_err(bad_request)? {
            let mut entry = entry.map_err(bad_request)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let rel = entry.path().unwrap().to_string_lossy().into_owned();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            let full = format!("{}/{}", target_path.trim_end_matches('/'), rel);
            self.put_file(id, &full, &contents);
            count += 1;
        }
        let mut details = serde_json::Map::new();
        details.insert("files".into(), count.into());
        Ok(ExtractArchiveResponse {
            message: Some("extracted".into()),
            details,
        })
    }

    async fn get_archive(&self, id: &str, source_path: &str) -> Result<Bytes> {
        self.enter("archive", source_path).await?;
        let contents = self
            .file(id, source_path)
            .ok_or_else(|| CoreError::NotFound(format!("{source_path} not found")))?;
        let name = source_path.rsplit('/').next().unwrap_or(source_path);

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_slice())
            .unwrap();
        Ok(Bytes::from(builder.into_inner().unwrap()))
    }

    async fn head_archive(&self, id: &str, path: &str) -> Result<ArchiveStat> {
        self.enter("head", path).await?;
        let contents = self
            .file(id, path)
            .ok_or_else(|| CoreError::NotFound(format!("{path} not found")))?;
        let mut stat = ArchiveStat::new();
        stat.insert("content-length".into(), contents.len().to_string());
        Ok(stat)
    }
}
