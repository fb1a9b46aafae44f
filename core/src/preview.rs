use crate::context::CapturedContext;
use crate::diff::DiffOp;
use crate::host::Decoration;
use crate::position::offset_to_position;

/// Ghost text shown at the end of the cursor line while waiting on the model.
pub const PENDING_MARKER: &str = "⋯";

/// Decorations that show `ops` on top of the captured window. Offsets in
/// `ops` refer to [`CapturedContext::text`].
pub fn preview_decorations(context: &CapturedContext, ops: &[DiffOp]) -> Vec<Decoration> {
    let text = context.text();
    ops.iter()
        .map(|op| match op {
            DiffOp::Delete { start, end } => Decoration::Strikethrough {
                start: context.host_point(&context.lines, offset_to_position(&text, *start)),
                end: context.host_point(&context.lines, offset_to_position(&text, *end)),
            },
            DiffOp::Insert { text: inserted, position } => Decoration::Ghost {
                at: context.host_point(&context.lines, offset_to_position(&text, *position)),
                lines: inserted.split('\n').map(str::to_string).collect(),
            },
        })
        .collect()
}

pub fn pending_decoration(context: &CapturedContext) -> Decoration {
    Decoration::Pending {
        row: context.start_line + context.cursor_row,
        text: PENDING_MARKER.to_string(),
    }
}
