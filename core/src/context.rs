use tracing::debug;

use crate::error::Result;
use crate::host::BufferId;
use crate::host::Host;
use crate::host::Point;
use crate::position::Position;
use crate::position::byte_to_char_col;
use crate::position::char_to_byte_col;
use crate::position::position_to_offset;

/// Marks the cursor inside the excerpt sent to the model.
pub const CURSOR_MARKER: &str = "█";

/// Snapshot of the window around the cursor taken when a prediction is
/// requested. Never modified afterwards; accepting compares the live buffer
/// against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedContext {
    pub lines: Vec<String>,
    /// Cursor row relative to `start_line`.
    pub cursor_row: usize,
    /// Cursor column in characters.
    pub cursor_col: usize,
    pub buffer: BufferId,
    pub buffer_name: String,
    /// First line of the window, zero based.
    pub start_line: usize,
    /// Last line of the window, inclusive.
    pub end_line: usize,
    pub line_count: usize,
}

impl CapturedContext {
    /// Capture up to `lines_before` lines above and `lines_after` lines
    /// below the cursor in the current buffer.
    pub async fn capture(host: &dyn Host, lines_before: usize, lines_after: usize) -> Result<Self> {
        let buffer = host.current_buffer().await?;
        let cursor = host.cursor().await?;
        let buffer_name = host.buffer_name(buffer).await?;
        let line_count = host.line_count(buffer).await?;

        let last_line = line_count.saturating_sub(1);
        let cursor_line = cursor.row.min(last_line);
        let start_line = cursor_line.saturating_sub(lines_before);
        let end_line = (cursor_line + lines_after).min(last_line);
        let lines = host.get_lines(buffer, start_line, end_line + 1).await?;

        let cursor_row = cursor_line - start_line;
        let cursor_col = lines
            .get(cursor_row)
            .map_or(0, |line| byte_to_char_col(line, cursor.col));
        debug!(buffer, start_line, end_line, "captured prediction context");

        Ok(Self {
            lines,
            cursor_row,
            cursor_col,
            buffer,
            buffer_name,
            start_line,
            end_line,
            line_count,
        })
    }

    /// The window joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Character offset of the cursor in [`Self::text`].
    pub fn cursor_offset(&self) -> usize {
        position_to_offset(
            &self.text(),
            Position {
                line: self.cursor_row,
                col: self.cursor_col,
            },
        )
    }

    /// [`Self::text`] with [`CURSOR_MARKER`] inserted at the cursor.
    pub fn text_with_cursor_marker(&self) -> String {
        let text = self.text();
        let offset = self.cursor_offset();
        let byte = text.char_indices().nth(offset).map_or(text.len(), |(i, _)| i);
        let mut marked = String::with_capacity(text.len() + CURSOR_MARKER.len());
        marked.push_str(&text[..byte]);
        marked.push_str(CURSOR_MARKER);
        marked.push_str(&text[byte..]);
        marked
    }

    /// Host point for a position relative to the window in `lines`.
    pub fn host_point(&self, lines: &[String], position: Position) -> Point {
        let col = lines
            .get(position.line)
            .map_or(0, |line| char_to_byte_col(line, position.col));
        Point::new(self.start_line + position.line, col)
    }

    /// Name shown to the model for this buffer.
    pub fn display_name(&self) -> &str {
        if self.buffer_name.is_empty() {
            "untitled"
        } else {
            &self.buffer_name
        }
    }
}
