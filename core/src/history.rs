use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::prompt::estimate_tokens;

pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// An edit as reported by the host in a `buffer_changed` notification.
/// Lines and columns are zero based.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BufferEdit {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub start_col: usize,
    #[serde(default)]
    pub end_col: usize,
    #[serde(default)]
    pub old_text: String,
    #[serde(default)]
    pub new_text: String,
}

/// A recorded edit. Immutable once it is in the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferChange {
    pub edit: BufferEdit,
    pub timestamp: DateTime<Utc>,
}

impl BufferChange {
    /// Render the change the way it is shown to the model.
    pub fn to_prompt(&self) -> String {
        let edit = &self.edit;
        let mut prompt = format!(
            "{}:{}-{}\n",
            edit.file_path,
            edit.start_line + 1,
            edit.end_line + 1
        );
        for line in edit.old_text.lines() {
            prompt.push('-');
            prompt.push_str(line);
            prompt.push('\n');
        }
        for line in edit.new_text.lines() {
            prompt.push('+');
            prompt.push_str(line);
            prompt.push('\n');
        }
        prompt
    }
}

/// Bounded log of recent edits, oldest first.
#[derive(Debug, Clone)]
pub struct ChangeHistory {
    entries: VecDeque<BufferChange>,
    capacity: usize,
}

impl Default for ChangeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ChangeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Record `edit`, stamping it with the current time. Edits without a file
    /// path are dropped. Returns whether the edit was recorded.
    pub fn add(&mut self, edit: BufferEdit) -> bool {
        if edit.file_path.is_empty() {
            debug!("ignoring buffer change without a file path");
            return false;
        }
        self.entries.push_back(BufferChange {
            edit,
            timestamp: Utc::now(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    pub fn list(&self) -> impl Iterator<Item = &BufferChange> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent changes whose rendered prompts fit in `budget`
    /// estimated tokens, returned oldest first. Selection walks back from the
    /// newest change and stops at the first one that does not fit.
    pub fn recent_within_budget(&self, budget: usize) -> Vec<&BufferChange> {
        let mut used = 0;
        let mut selected: Vec<&BufferChange> = Vec::new();
        for change in self.entries.iter().rev() {
            let cost = estimate_tokens(&change.to_prompt());
            if used + cost > budget {
                break;
            }
            used += cost;
            selected.push(change);
        }
        selected.reverse();
        selected
    }
}
