#![allow(clippy::expect_used, clippy::unwrap_used)]

//! In-memory stand-ins for the editor and the model, shared by the
//! `foresight-core` integration tests.


use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use async_trait::async_trait;
use foresight_core::config::Config;
use foresight_core::config::ConfigOverrides;
use foresight_core::config::ConfigToml;
use foresight_core::error::ForesightErr;
use foresight_core::error::Result;
use foresight_core::host::BufferId;
use foresight_core::host::Decoration;
use foresight_core::host::Host;
use foresight_core::host::ListenerHandle;
use foresight_core::host::NamespaceId;
use foresight_core::host::Point;
use foresight_core::model::ModelClient;
use foresight_core::model::ModelRequest;
use foresight_rpc::RpcError;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::oneshot;

pub fn load_default_config_for_test(foresight_home: &TempDir) -> Config {
    Config::load_from_base_config_with_overrides(
        ConfigToml::default(),
        ConfigOverrides::default(),
        foresight_home.path().to_path_buf(),
    )
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

#[derive(Debug, Clone)]
struct FakeBuffer {
    name: String,
    lines: Vec<String>,
}

#[derive(Debug, Default)]
struct HostState {
    buffers: BTreeMap<BufferId, FakeBuffer>,
    current: BufferId,
    cursor: Point,
    mode: String,
    namespaces: Vec<String>,
    decorations: BTreeMap<BufferId, Vec<Decoration>>,
    next_listener_id: i64,
    live_listeners: BTreeMap<i64, BufferId>,
    listener_installs: Vec<(BufferId, bool)>,
    active_flags: Vec<bool>,
    reported_errors: Vec<String>,
    writes: usize,
}

/// Editor with buffers held in memory.
#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                mode: "n".to_string(),
                ..HostState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// Add a buffer and make it current.
    pub fn open(&self, buffer: BufferId, name: &str, lines: &[&str]) {
        let mut state = self.state();
        state.buffers.insert(
            buffer,
            FakeBuffer {
                name: name.to_string(),
                lines: lines.iter().map(|l| (*l).to_string()).collect(),
            },
        );
        state.current = buffer;
    }

    pub fn switch_to(&self, buffer: BufferId) {
        self.state().current = buffer;
    }

    pub fn place_cursor(&self, row: usize, col: usize) {
        self.state().cursor = Point::new(row, col);
    }

    pub fn set_mode(&self, mode: &str) {
        self.state().mode = mode.to_string();
    }

    /// Simulate the user typing: replace the whole buffer without going
    /// through [`Host::set_lines`].
    pub fn user_edit(&self, buffer: BufferId, lines: &[&str]) {
        let mut state = self.state();
        let entry = state.buffers.get_mut(&buffer).expect("unknown buffer");
        entry.lines = lines.iter().map(|l| (*l).to_string()).collect();
    }

    pub fn lines(&self, buffer: BufferId) -> Vec<String> {
        self.state().buffers[&buffer].lines.clone()
    }

    pub fn cursor_position(&self) -> Point {
        self.state().cursor
    }

    pub fn decorations(&self, buffer: BufferId) -> Vec<Decoration> {
        self.state()
            .decorations
            .get(&buffer)
            .cloned()
            .unwrap_or_default()
    }

    /// Buffers that currently carry any decoration.
    pub fn decorated_buffers(&self) -> Vec<BufferId> {
        self.state()
            .decorations
            .iter()
            .filter(|(_, decorations)| !decorations.is_empty())
            .map(|(buffer, _)| *buffer)
            .collect()
    }

    pub fn namespaces_created(&self) -> usize {
        self.state().namespaces.len()
    }

    pub fn live_listeners(&self) -> Vec<BufferId> {
        self.state().live_listeners.values().copied().collect()
    }

    /// Every `(buffer, watch_mode_change)` listener installation so far.
    pub fn listener_installs(&self) -> Vec<(BufferId, bool)> {
        self.state().listener_installs.clone()
    }

    pub fn active_flags(&self) -> Vec<bool> {
        self.state().active_flags.clone()
    }

    pub fn reported_errors(&self) -> Vec<String> {
        self.state().reported_errors.clone()
    }

    /// Number of buffer writes made through the host API.
    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

fn no_such_buffer(method: &str, buffer: BufferId) -> ForesightErr {
    ForesightErr::Rpc(RpcError::Remote {
        method: method.to_string(),
        message: format!("Invalid buffer id: {buffer}"),
    })
}

#[async_trait]
impl Host for FakeHost {
    async fn current_buffer(&self) -> Result<BufferId> {
        Ok(self.state().current)
    }

    async fn buffer_name(&self, buffer: BufferId) -> Result<String> {
        self.state()
            .buffers
            .get(&buffer)
            .map(|b| b.name.clone())
            .ok_or_else(|| no_such_buffer("nvim_buf_get_name", buffer))
    }

    async fn line_count(&self, buffer: BufferId) -> Result<usize> {
        self.state()
            .buffers
            .get(&buffer)
            .map(|b| b.lines.len())
            .ok_or_else(|| no_such_buffer("nvim_buf_line_count", buffer))
    }

    async fn get_lines(&self, buffer: BufferId, start: usize, end: usize) -> Result<Vec<String>> {
        let state = self.state();
        let lines = &state
            .buffers
            .get(&buffer)
            .ok_or_else(|| no_such_buffer("nvim_buf_get_lines", buffer))?
            .lines;
        let end = end.min(lines.len());
        Ok(lines[start.min(end)..end].to_vec())
    }

    async fn set_lines(
        &self,
        buffer: BufferId,
        start: usize,
        end: usize,
        replacement: Vec<String>,
    ) -> Result<()> {
        let mut state = self.state();
        let lines = &mut state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| no_such_buffer("nvim_buf_set_lines", buffer))?
            .lines;
        if start > end || end > lines.len() {
            return Err(ForesightErr::Rpc(RpcError::Remote {
                method: "nvim_buf_set_lines".to_string(),
                message: "Index out of bounds".to_string(),
            }));
        }
        lines.splice(start..end, replacement);
        state.writes += 1;
        Ok(())
    }

    async fn set_text(
        &self,
        buffer: BufferId,
        start: Point,
        end: Point,
        replacement: Vec<String>,
    ) -> Result<()> {
        let mut state = self.state();
        let lines = &mut state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| no_such_buffer("nvim_buf_set_text", buffer))?
            .lines;
        let prefix = lines[start.row][..start.col].to_string();
        let suffix = lines[end.row][end.col..].to_string();
        let mut new_lines = replacement;
        if new_lines.is_empty() {
            new_lines.push(String::new());
        }
        new_lines[0] = format!("{prefix}{}", new_lines[0]);
        let last = new_lines.len() - 1;
        new_lines[last].push_str(&suffix);
        lines.splice(start.row..=end.row, new_lines);
        state.writes += 1;
        Ok(())
    }

    async fn cursor(&self) -> Result<Point> {
        Ok(self.state().cursor)
    }

    async fn set_cursor(&self, at: Point) -> Result<()> {
        self.state().cursor = at;
        Ok(())
    }

    async fn mode(&self) -> Result<String> {
        Ok(self.state().mode.clone())
    }

    async fn create_namespace(&self, name: &str) -> Result<NamespaceId> {
        let mut state = self.state();
        state.namespaces.push(name.to_string());
        Ok(state.namespaces.len() as NamespaceId)
    }

    async fn decorate(
        &self,
        buffer: BufferId,
        _namespace: NamespaceId,
        decoration: &Decoration,
    ) -> Result<()> {
        self.state()
            .decorations
            .entry(buffer)
            .or_default()
            .push(decoration.clone());
        Ok(())
    }

    async fn clear_namespace(&self, buffer: BufferId, _namespace: NamespaceId) -> Result<()> {
        self.state().decorations.remove(&buffer);
        Ok(())
    }

    async fn install_preview_listeners(
        &self,
        buffer: BufferId,
        watch_mode_change: bool,
    ) -> Result<ListenerHandle> {
        let mut state = self.state();
        state.listener_installs.push((buffer, watch_mode_change));
        let count = if watch_mode_change { 2 } else { 1 };
        let mut ids = Vec::new();
        for _ in 0..count {
            state.next_listener_id += 1;
            let id = state.next_listener_id;
            state.live_listeners.insert(id, buffer);
            ids.push(id);
        }
        Ok(ListenerHandle { buffer, ids })
    }

    async fn remove_preview_listeners(&self, handle: &ListenerHandle) -> Result<()> {
        let mut state = self.state();
        for id in &handle.ids {
            state.live_listeners.remove(id);
        }
        Ok(())
    }

    async fn set_prediction_active(&self, active: bool) {
        self.state().active_flags.push(active);
    }

    async fn report_error(&self, message: &str) {
        self.state().reported_errors.push(message.to_string());
    }
}

enum ScriptedReply {
    Ready(Result<Option<Value>>),
    Deferred(oneshot::Receiver<Option<Value>>),
}

/// Model that answers from a queue of scripted replies. Running out of
/// replies answers with no structured result.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, output: Value) {
        self.push(ScriptedReply::Ready(Ok(Some(output))));
    }

    pub fn reply_without_tool_call(&self) {
        self.push(ScriptedReply::Ready(Ok(None)));
    }

    pub fn fail(&self, message: &str) {
        self.push(ScriptedReply::Ready(Err(ForesightErr::Io(
            std::io::Error::other(message.to_string()),
        ))));
    }

    /// Queue a reply that is held until the returned sender fires.
    pub fn defer(&self) -> oneshot::Sender<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        self.push(ScriptedReply::Deferred(rx));
        tx
    }

    fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<Option<Value>> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(ScriptedReply::Ready(result)) => result,
            Some(ScriptedReply::Deferred(rx)) => Ok(rx.await.unwrap_or(None)),
            None => Ok(None),
        }
    }
}
