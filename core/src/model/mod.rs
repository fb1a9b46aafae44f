//! Boundary to the language model: one request in, at most one structured
//! tool result out.

mod anthropic;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::error::Result;

pub use anthropic::AnthropicClient;

pub const PREDICTION_TOOL: &str = "propose_edit";
pub const INLINE_EDIT_TOOL: &str = "apply_edit";

/// Tool definition the model is forced to call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub prompt: String,
    pub tool: ToolSpec,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run `request` and return the input the model passed to the tool, or
    /// `None` when it did not call it.
    async fn complete(&self, request: &ModelRequest) -> Result<Option<Value>>;
}

pub fn prediction_tool() -> ToolSpec {
    ToolSpec {
        name: PREDICTION_TOOL,
        description: "Propose the next edit as a find/replace pair on the excerpt.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "find": {
                    "type": "string",
                    "description": "Text copied verbatim from the excerpt.",
                },
                "replace": {
                    "type": "string",
                    "description": "Text that replaces `find`.",
                },
            },
            "required": ["find", "replace"],
        }),
    }
}

/// Line-range edit, or a plain replacement when the user selected text.
pub fn inline_edit_tool(has_selection: bool) -> ToolSpec {
    if has_selection {
        return ToolSpec {
            name: INLINE_EDIT_TOOL,
            description: "Replace the selected text.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "replace": { "type": "string" },
                },
                "required": ["replace"],
            }),
        };
    }
    ToolSpec {
        name: INLINE_EDIT_TOOL,
        description: "Replace an inclusive, 1-based range of lines.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "startLine": { "type": "integer", "minimum": 1 },
                "endLine": { "type": "integer", "minimum": 1 },
                "replace": { "type": "string" },
            },
            "required": ["startLine", "endLine", "replace"],
        }),
    }
}
