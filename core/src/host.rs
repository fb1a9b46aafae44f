//! The editor operations foresight consumes.
//!
//! [`Host`] is the seam between the prediction/edit logic and the editor
//! process. The production implementation is [`crate::rpc_host::RpcHost`];
//! integration tests drive an in-memory one.

use async_trait::async_trait;

use crate::error::Result;

pub type BufferId = i64;
pub type NamespaceId = i64;

/// A location in a buffer as the host addresses it: zero-based row, byte
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub row: usize,
    pub col: usize,
}

impl Point {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Non-destructive annotations drawn in the preview namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoration {
    /// Strike through the host text in `start..end`.
    Strikethrough { start: Point, end: Point },
    /// Ghost text anchored at `at`. The first line is drawn inline; any
    /// further lines are drawn as virtual lines below `at.row`.
    Ghost { at: Point, lines: Vec<String> },
    /// Marker at the end of `row` while a request is in flight.
    Pending { row: usize, text: String },
}

/// Host-side hooks installed while a preview is displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    pub buffer: BufferId,
    pub ids: Vec<i64>,
}

#[async_trait]
pub trait Host: Send + Sync {
    async fn current_buffer(&self) -> Result<BufferId>;

    /// Display name of `buffer`, empty for unnamed buffers.
    async fn buffer_name(&self, buffer: BufferId) -> Result<String>;

    async fn line_count(&self, buffer: BufferId) -> Result<usize>;

    /// Lines `start..end`. Ranges past the end of the buffer are truncated.
    async fn get_lines(&self, buffer: BufferId, start: usize, end: usize) -> Result<Vec<String>>;

    /// Replace lines `start..end` with `lines`.
    async fn set_lines(
        &self,
        buffer: BufferId,
        start: usize,
        end: usize,
        lines: Vec<String>,
    ) -> Result<()>;

    /// Replace the text in `start..end` with `lines`.
    async fn set_text(
        &self,
        buffer: BufferId,
        start: Point,
        end: Point,
        lines: Vec<String>,
    ) -> Result<()>;

    /// Cursor of the current window.
    async fn cursor(&self) -> Result<Point>;

    async fn set_cursor(&self, at: Point) -> Result<()>;

    /// Short mode name, `"n"` for normal mode.
    async fn mode(&self) -> Result<String>;

    async fn create_namespace(&self, name: &str) -> Result<NamespaceId>;

    async fn decorate(
        &self,
        buffer: BufferId,
        namespace: NamespaceId,
        decoration: &Decoration,
    ) -> Result<()>;

    async fn clear_namespace(&self, buffer: BufferId, namespace: NamespaceId) -> Result<()>;

    /// Install the hooks that report an implicit dismissal of the preview in
    /// `buffer` through a `prediction_dismissed` notification. When
    /// `watch_mode_change` is set, leaving normal mode also dismisses.
    async fn install_preview_listeners(
        &self,
        buffer: BufferId,
        watch_mode_change: bool,
    ) -> Result<ListenerHandle>;

    async fn remove_preview_listeners(&self, handle: &ListenerHandle) -> Result<()>;

    /// Best-effort flag the host can use to show that a preview is up.
    async fn set_prediction_active(&self, active: bool);

    /// Best-effort message to the user.
    async fn report_error(&self, message: &str);
}
