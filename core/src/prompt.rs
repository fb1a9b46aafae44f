//! Prompt text for the two model interactions.

use crate::context::CapturedContext;
use crate::history::BufferChange;
use crate::inline_edit::InlineEditRequest;

pub const PREDICTION_SYSTEM_PROMPT: &str = "You predict the next edit a programmer is about to make. \
You are shown their most recent edits and an excerpt of the file they are working in, with the \
cursor marked by █. Propose exactly one edit by calling the tool: `find` must be text copied \
verbatim from the excerpt (it may include the cursor marker) and `replace` is the text that \
should take its place. Keep the edit small and focused on what the user is doing right now.";

pub const INLINE_EDIT_SYSTEM_PROMPT: &str = "You edit source code on request. You are shown a \
file with line numbers, the cursor position, and an instruction. Perform the instruction by \
calling the tool exactly once. Line numbers are 1-based and inclusive. `replace` is the complete \
new text for the given lines, without line numbers.";

/// Rough token count used for budgeting: one token per three characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(3)
}

pub fn prediction_prompt(context: &CapturedContext, history: &[&BufferChange]) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("## Recent edits\n\n");
        for change in history {
            prompt.push_str(&change.to_prompt());
            prompt.push('\n');
        }
    }
    prompt.push_str(&format!(
        "## Current file\n\n```{}\n{}\n```\n",
        context.display_name(),
        context.text_with_cursor_marker()
    ));
    prompt
}

pub fn inline_edit_prompt(request: &InlineEditRequest) -> String {
    let mut prompt = format!("## File: {}\n\n```\n", request.file_path);
    for (index, line) in request.content.split('\n').enumerate() {
        prompt.push_str(&format!("{:>4} | {line}\n", index + 1));
    }
    prompt.push_str("```\n\n");
    prompt.push_str(&format!(
        "Cursor: line {}, column {}\n",
        request.cursor.row + 1,
        request.cursor.col + 1
    ));
    if let Some(selection) = &request.selection {
        prompt.push_str(&format!(
            "Selection: lines {}-{}\n",
            selection.start_line, selection.end_line
        ));
        if let Some(selected) = request.selected_text() {
            prompt.push_str(&format!("\n```\n{selected}\n```\n"));
        }
        prompt.push_str("\nRewrite only the selected text.\n");
    }
    prompt.push_str(&format!("\n## Instruction\n\n{}\n", request.instruction));
    prompt
}
