use async_trait::async_trait;
use foresight_rpc::Session;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::error::ForesightErr;
use crate::error::Result;
use crate::host::BufferId;
use crate::host::Decoration;
use crate::host::Host;
use crate::host::ListenerHandle;
use crate::host::NamespaceId;
use crate::host::Point;

pub const DELETE_HIGHLIGHT: &str = "ForesightDelete";
pub const INSERT_HIGHLIGHT: &str = "ForesightInsert";
const PENDING_HIGHLIGHT: &str = "Comment";

const INSTALL_LISTENERS_LUA: &str = r#"
local buf, chan, watch_mode = ...
local function dismiss()
  vim.rpcnotify(chan, "prediction_dismissed", buf)
end
local ids = {}
if watch_mode then
  table.insert(ids, vim.api.nvim_create_autocmd("ModeChanged", {
    buffer = buf, pattern = "n:*", once = true, callback = dismiss,
  }))
end
table.insert(ids, vim.api.nvim_create_autocmd({ "TextChanged", "TextChangedI", "InsertLeave" }, {
  buffer = buf, once = true, callback = dismiss,
}))
return ids
"#;

const REMOVE_LISTENERS_LUA: &str = r#"
for _, id in ipairs(...) do
  pcall(vim.api.nvim_del_autocmd, id)
end
"#;

/// [`Host`] backed by an msgpack-rpc [`Session`] with a Neovim-compatible
/// host on the other end.
#[derive(Clone)]
pub struct RpcHost {
    session: Session,
}

#[derive(Deserialize)]
struct ModeInfo {
    mode: String,
}

impl RpcHost {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        args: Vec<Value>,
    ) -> Result<T> {
        let value = self.session.call(method, args).await?;
        serde_json::from_value(value).map_err(|source| ForesightErr::HostDecode { method, source })
    }

    async fn exec_lua<T: DeserializeOwned>(&self, code: &str, args: Vec<Value>) -> Result<T> {
        self.request("nvim_exec_lua", vec![json!(code), Value::Array(args)])
            .await
    }

    fn highlight_defaults(&self) {
        for (group, attrs) in [
            (DELETE_HIGHLIGHT, json!({ "strikethrough": true, "default": true })),
            (INSERT_HIGHLIGHT, json!({ "link": "Comment", "default": true })),
        ] {
            if let Err(err) = self
                .session
                .notify("nvim_set_hl", vec![json!(0), json!(group), attrs])
            {
                debug!("could not define highlight {group}: {err}");
            }
        }
    }
}

fn extmark_for(decoration: &Decoration) -> (Point, Value) {
    match decoration {
        Decoration::Strikethrough { start, end } => (
            *start,
            json!({
                "end_row": end.row,
                "end_col": end.col,
                "hl_group": DELETE_HIGHLIGHT,
            }),
        ),
        Decoration::Ghost { at, lines } => {
            let mut opts = serde_json::Map::new();
            if let Some(first) = lines.first().filter(|line| !line.is_empty()) {
                opts.insert("virt_text".into(), json!([[first, INSERT_HIGHLIGHT]]));
                opts.insert("virt_text_pos".into(), json!("inline"));
            }
            let rest: Vec<Value> = lines
                .iter()
                .skip(1)
                .map(|line| json!([[line, INSERT_HIGHLIGHT]]))
                .collect();
            if !rest.is_empty() {
                opts.insert("virt_lines".into(), Value::Array(rest));
            }
            (*at, Value::Object(opts))
        }
        Decoration::Pending { row, text } => (
            Point::new(*row, 0),
            json!({
                "virt_text": [[text, PENDING_HIGHLIGHT]],
                "virt_text_pos": "eol",
            }),
        ),
    }
}

#[async_trait]
impl Host for RpcHost {
    async fn current_buffer(&self) -> Result<BufferId> {
        // Buffer handles come back as msgpack extension values from
        // nvim_get_current_buf; going through Lua yields a plain integer.
        self.exec_lua("return vim.api.nvim_get_current_buf()", Vec::new())
            .await
    }

    async fn buffer_name(&self, buffer: BufferId) -> Result<String> {
        self.request("nvim_buf_get_name", vec![json!(buffer)]).await
    }

    async fn line_count(&self, buffer: BufferId) -> Result<usize> {
        self.request("nvim_buf_line_count", vec![json!(buffer)])
            .await
    }

    async fn get_lines(&self, buffer: BufferId, start: usize, end: usize) -> Result<Vec<String>> {
        self.request(
            "nvim_buf_get_lines",
            vec![json!(buffer), json!(start), json!(end), json!(false)],
        )
        .await
    }

    async fn set_lines(
        &self,
        buffer: BufferId,
        start: usize,
        end: usize,
        lines: Vec<String>,
    ) -> Result<()> {
        self.request::<Value>(
            "nvim_buf_set_lines",
            vec![
                json!(buffer),
                json!(start),
                json!(end),
                json!(true),
                json!(lines),
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_text(
        &self,
        buffer: BufferId,
        start: Point,
        end: Point,
        lines: Vec<String>,
    ) -> Result<()> {
        self.request::<Value>(
            "nvim_buf_set_text",
            vec![
                json!(buffer),
                json!(start.row),
                json!(start.col),
                json!(end.row),
                json!(end.col),
                json!(lines),
            ],
        )
        .await?;
        Ok(())
    }

    async fn cursor(&self) -> Result<Point> {
        let (row, col): (usize, usize) = self
            .request("nvim_win_get_cursor", vec![json!(0)])
            .await?;
        Ok(Point::new(row.saturating_sub(1), col))
    }

    async fn set_cursor(&self, at: Point) -> Result<()> {
        self.request::<Value>(
            "nvim_win_set_cursor",
            vec![json!(0), json!([at.row + 1, at.col])],
        )
        .await?;
        Ok(())
    }

    async fn mode(&self) -> Result<String> {
        let info: ModeInfo = self.request("nvim_get_mode", Vec::new()).await?;
        Ok(info.mode)
    }

    async fn create_namespace(&self, name: &str) -> Result<NamespaceId> {
        let namespace = self
            .request("nvim_create_namespace", vec![json!(name)])
            .await?;
        self.highlight_defaults();
        Ok(namespace)
    }

    async fn decorate(
        &self,
        buffer: BufferId,
        namespace: NamespaceId,
        decoration: &Decoration,
    ) -> Result<()> {
        let (at, opts) = extmark_for(decoration);
        self.request::<Value>(
            "nvim_buf_set_extmark",
            vec![
                json!(buffer),
                json!(namespace),
                json!(at.row),
                json!(at.col),
                opts,
            ],
        )
        .await?;
        Ok(())
    }

    async fn clear_namespace(&self, buffer: BufferId, namespace: NamespaceId) -> Result<()> {
        self.request::<Value>(
            "nvim_buf_clear_namespace",
            vec![json!(buffer), json!(namespace), json!(0), json!(-1)],
        )
        .await?;
        Ok(())
    }

    async fn install_preview_listeners(
        &self,
        buffer: BufferId,
        watch_mode_change: bool,
    ) -> Result<ListenerHandle> {
        let channel = self.session.channel_id().ok_or(ForesightErr::NotConnected)?;
        let ids: Vec<i64> = self
            .exec_lua(
                INSTALL_LISTENERS_LUA,
                vec![json!(buffer), json!(channel), json!(watch_mode_change)],
            )
            .await?;
        Ok(ListenerHandle { buffer, ids })
    }

    async fn remove_preview_listeners(&self, handle: &ListenerHandle) -> Result<()> {
        self.exec_lua::<Value>(REMOVE_LISTENERS_LUA, vec![json!(handle.ids)])
            .await?;
        Ok(())
    }

    async fn set_prediction_active(&self, active: bool) {
        if let Err(err) = self.session.notify(
            "nvim_set_var",
            vec![json!("foresight_prediction_active"), json!(active)],
        ) {
            debug!("could not publish prediction state: {err}");
        }
    }

    async fn report_error(&self, message: &str) {
        // vim.log.levels.WARN
        if let Err(err) = self
            .session
            .notify("nvim_notify", vec![json!(message), json!(3), json!({})])
        {
            debug!("could not report error to host: {err}");
        }
    }
}
