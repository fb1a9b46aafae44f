use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ForesightErr;
use crate::error::Result;
use crate::host::BufferId;
use crate::host::Host;
use crate::host::Point;
use crate::model::ModelClient;
use crate::model::ModelRequest;
use crate::model::inline_edit_tool;
use crate::prompt::INLINE_EDIT_SYSTEM_PROMPT;
use crate::prompt::inline_edit_prompt;

/// Zero-based cursor as sent by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CursorPosition {
    pub row: usize,
    pub col: usize,
}

/// Lines are 1-based and inclusive. With both columns set (zero-based
/// bytes, end exclusive) the selection covers an exact character range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Selection {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub start_col: Option<usize>,
    #[serde(default)]
    pub end_col: Option<usize>,
}

/// Arguments of the `inline_edit` request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InlineEditRequest {
    pub buffer: BufferId,
    pub file_path: String,
    pub content: String,
    pub cursor: CursorPosition,
    pub instruction: String,
    #[serde(default)]
    pub selection: Option<Selection>,
}

impl InlineEditRequest {
    pub fn line_count(&self) -> usize {
        self.content.split('\n').count()
    }

    /// Text covered by the selection, if the selection lies inside the
    /// content.
    pub fn selected_text(&self) -> Option<String> {
        let selection = self.selection.as_ref()?;
        if selection.start_line == 0
            || selection.start_line > selection.end_line
            || selection.end_line > self.line_count()
        {
            return None;
        }
        let lines: Vec<&str> = self
            .content
            .split('\n')
            .skip(selection.start_line - 1)
            .take(selection.end_line - selection.start_line + 1)
            .collect();
        let (Some(start_col), Some(end_col)) = (selection.start_col, selection.end_col) else {
            return Some(lines.join("\n"));
        };
        let last = lines.len() - 1;
        let mut selected = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let from = if index == 0 { start_col.min(line.len()) } else { 0 };
            let to = if index == last { end_col.min(line.len()) } else { line.len() };
            selected.push(line.get(from..to.max(from)).unwrap_or_default());
        }
        Some(selected.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineEdit {
    start_line: usize,
    end_line: usize,
    replace: String,
}

#[derive(Debug, Deserialize)]
struct SelectionEdit {
    replace: String,
}

pub struct InlineEditor {
    host: Arc<dyn Host>,
    model: Arc<dyn ModelClient>,
    timeout: Option<Duration>,
}

impl InlineEditor {
    pub fn new(host: Arc<dyn Host>, model: Arc<dyn ModelClient>, timeout: Option<Duration>) -> Self {
        Self {
            host,
            model,
            timeout,
        }
    }

    /// Ask the model for the edit described by `request` and write it into
    /// the buffer. Nothing is written unless the model output is valid.
    pub async fn run(&self, request: &InlineEditRequest) -> Result<()> {
        let model_request = ModelRequest {
            system: INLINE_EDIT_SYSTEM_PROMPT.to_string(),
            prompt: inline_edit_prompt(request),
            tool: inline_edit_tool(request.selection.is_some()),
        };
        let call = self.model.complete(&model_request);
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ForesightErr::model_timeout(limit))??,
            None => call.await?,
        }
        .ok_or(ForesightErr::NoStructuredResult)?;

        let line_count = request.line_count();
        match &request.selection {
            None => {
                let edit: LineEdit =
                    serde_json::from_value(output).map_err(ForesightErr::InvalidModelOutput)?;
                check_line_range(edit.start_line, edit.end_line, line_count)?;
                self.host
                    .set_lines(
                        request.buffer,
                        edit.start_line - 1,
                        edit.end_line,
                        split_lines(&edit.replace),
                    )
                    .await?;
                info!(
                    buffer = request.buffer,
                    start_line = edit.start_line,
                    end_line = edit.end_line,
                    "applied inline edit"
                );
            }
            Some(selection) => {
                let edit: SelectionEdit =
                    serde_json::from_value(output).map_err(ForesightErr::InvalidModelOutput)?;
                check_line_range(selection.start_line, selection.end_line, line_count)?;
                let lines = split_lines(&edit.replace);
                match (selection.start_col, selection.end_col) {
                    (Some(start_col), Some(end_col)) => {
                        self.host
                            .set_text(
                                request.buffer,
                                Point::new(selection.start_line - 1, start_col),
                                Point::new(selection.end_line - 1, end_col),
                                lines,
                            )
                            .await?
                    }
                    _ => {
                        self.host
                            .set_lines(
                                request.buffer,
                                selection.start_line - 1,
                                selection.end_line,
                                lines,
                            )
                            .await?
                    }
                }
                info!(
                    buffer = request.buffer,
                    start_line = selection.start_line,
                    end_line = selection.end_line,
                    "applied inline edit to selection"
                );
            }
        }
        Ok(())
    }
}

fn check_line_range(start: usize, end: usize, line_count: usize) -> Result<()> {
    if start == 0 || start > end || end > line_count {
        return Err(ForesightErr::LineRangeOutOfBounds {
            start,
            end,
            line_count,
        });
    }
    Ok(())
}

fn split_lines(text: &str) -> Vec<String> {
    text.strip_suffix('\n')
        .unwrap_or(text)
        .split('\n')
        .map(str::to_string)
        .collect()
}
