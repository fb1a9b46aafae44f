//! Edit prediction lifecycle.
//!
//! ```text
//! idle --trigger--> awaiting-reply --reply--> displaying-proposed-edit
//!   ^                    |                        |            |
//!   +----failure---------+                        | dismiss    | accept
//!   +---------------------------------------------+            v
//!   +--------------------------------------------------- applying
//! ```
//!
//! The controller is driven from notification handlers that may interleave
//! at every host round trip, so each transition re-checks the state it
//! expects after awaiting. The state mutex is never held across an await.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::context::CURSOR_MARKER;
use crate::context::CapturedContext;
use crate::diff::diff_words;
use crate::error::ForesightErr;
use crate::error::Result;
use crate::history::ChangeHistory;
use crate::host::BufferId;
use crate::host::Decoration;
use crate::host::Host;
use crate::host::ListenerHandle;
use crate::host::NamespaceId;
use crate::model::ModelClient;
use crate::model::ModelRequest;
use crate::model::prediction_tool;
use crate::position::offset_to_position;
use crate::preview::pending_decoration;
use crate::preview::preview_decorations;
use crate::prompt::PREDICTION_SYSTEM_PROMPT;
use crate::prompt::prediction_prompt;

pub const PREVIEW_NAMESPACE: &str = "foresight_preview";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PredictionState {
    #[default]
    Idle,
    AwaitingReply {
        request_id: u64,
        context: Arc<CapturedContext>,
    },
    DisplayingProposedEdit {
        context: Arc<CapturedContext>,
        prediction: Prediction,
    },
    Applying {
        context: Arc<CapturedContext>,
        prediction: Prediction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionSettings {
    pub lines_before: usize,
    pub lines_after: usize,
    pub history_token_budget: usize,
    pub timeout: Option<Duration>,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            lines_before: 10,
            lines_after: 20,
            history_token_budget: 1000,
            timeout: None,
        }
    }
}

/// Result of resolving a prediction against the text it was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEdit {
    pub new_text: String,
    /// Character offset in `new_text` just past the replacement.
    pub cursor_offset: usize,
}

/// Replace the first occurrence of `prediction.find` in `text`. When the
/// exact text is absent and `find` carries the cursor marker, the marker is
/// stripped and the search retried.
pub fn resolve_prediction(text: &str, prediction: &Prediction) -> Result<ResolvedEdit> {
    let stripped;
    let find = if !prediction.find.is_empty() && text.contains(&prediction.find) {
        prediction.find.as_str()
    } else if prediction.find.contains(CURSOR_MARKER) {
        stripped = prediction.find.replace(CURSOR_MARKER, "");
        stripped.as_str()
    } else {
        return Err(ForesightErr::FindNotFound);
    };
    if find.is_empty() {
        return Err(ForesightErr::FindNotFound);
    }
    let start = text.find(find).ok_or(ForesightErr::FindNotFound)?;

    let replace = prediction.replace.replace(CURSOR_MARKER, "");
    let mut new_text = String::with_capacity(text.len() + replace.len());
    new_text.push_str(&text[..start]);
    new_text.push_str(&replace);
    new_text.push_str(&text[start + find.len()..]);
    let cursor_offset = text[..start].chars().count() + replace.chars().count();
    Ok(ResolvedEdit {
        new_text,
        cursor_offset,
    })
}

/// Preview resources owned by the controller. At most one buffer carries
/// decorations in the preview namespace at a time.
#[derive(Default)]
struct PreviewResources {
    decorated: Option<BufferId>,
    listeners: Option<ListenerHandle>,
}

pub struct PredictionController {
    host: Arc<dyn Host>,
    model: Arc<dyn ModelClient>,
    history: Arc<Mutex<ChangeHistory>>,
    settings: PredictionSettings,
    state: Mutex<PredictionState>,
    last_request_id: AtomicU64,
    namespace: OnceCell<NamespaceId>,
    preview: tokio::sync::Mutex<PreviewResources>,
}

impl PredictionController {
    pub fn new(
        host: Arc<dyn Host>,
        model: Arc<dyn ModelClient>,
        history: Arc<Mutex<ChangeHistory>>,
        settings: PredictionSettings,
    ) -> Self {
        Self {
            host,
            model,
            history,
            settings,
            state: Mutex::new(PredictionState::Idle),
            last_request_id: AtomicU64::new(0),
            namespace: OnceCell::new(),
            preview: tokio::sync::Mutex::new(PreviewResources::default()),
        }
    }

    pub fn state(&self) -> PredictionState {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, PredictionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Manual trigger: request a prediction when idle, accept the displayed
    /// one otherwise. Ignored while a request or an apply is in flight.
    pub async fn trigger(&self) -> Result<()> {
        let accept = {
            let state = self.lock_state();
            match &*state {
                PredictionState::Idle => false,
                PredictionState::DisplayingProposedEdit { .. } => true,
                PredictionState::AwaitingReply { request_id, .. } => {
                    debug!(request_id, "prediction already in flight; ignoring trigger");
                    return Ok(());
                }
                PredictionState::Applying { .. } => {
                    debug!("prediction is being applied; ignoring trigger");
                    return Ok(());
                }
            }
        };
        if accept {
            self.accept().await
        } else {
            self.request_prediction().await
        }
    }

    async fn request_prediction(&self) -> Result<()> {
        let context = Arc::new(
            CapturedContext::capture(
                self.host.as_ref(),
                self.settings.lines_before,
                self.settings.lines_after,
            )
            .await?,
        );

        let request_id = {
            let mut state = self.lock_state();
            if *state != PredictionState::Idle {
                debug!("state changed while capturing context; dropping trigger");
                return Ok(());
            }
            let request_id = self.last_request_id.fetch_add(1, Ordering::Relaxed) + 1;
            *state = PredictionState::AwaitingReply {
                request_id,
                context: Arc::clone(&context),
            };
            request_id
        };
        info!(request_id, buffer = context.buffer, "requesting prediction");

        let reply = self.fetch_prediction(&context).await;
        self.complete(request_id, reply).await
    }

    async fn fetch_prediction(&self, context: &CapturedContext) -> Result<Option<Prediction>> {
        if let Err(err) = self.show(context.buffer, &[pending_decoration(context)]).await {
            warn!("could not show in-progress marker: {err}");
        }

        let prompt = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let recent = history.recent_within_budget(self.settings.history_token_budget);
            prediction_prompt(context, &recent)
        };
        let request = ModelRequest {
            system: PREDICTION_SYSTEM_PROMPT.to_string(),
            prompt,
            tool: prediction_tool(),
        };

        let output = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, self.model.complete(&request))
                .await
                .map_err(|_| ForesightErr::model_timeout(limit))??,
            None => self.model.complete(&request).await?,
        };
        output
            .map(|value| serde_json::from_value(value).map_err(ForesightErr::InvalidModelOutput))
            .transpose()
    }

    /// Deliver the model's reply for `request_id`. Replies for anything but
    /// the live request are dropped.
    pub async fn complete(
        &self,
        request_id: u64,
        reply: Result<Option<Prediction>>,
    ) -> Result<()> {
        let Some(context) = self.awaiting_context(request_id) else {
            debug!(request_id, "discarding stale prediction reply");
            return Ok(());
        };

        let prediction = match reply.and_then(|p| p.ok_or(ForesightErr::NoStructuredResult)) {
            Ok(prediction) => prediction,
            Err(err) => {
                self.abandon(request_id).await;
                return Err(err);
            }
        };
        let resolved = match resolve_prediction(&context.text(), &prediction) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.abandon(request_id).await;
                return Err(err);
            }
        };

        let ops = diff_words(&context.text(), &resolved.new_text);
        if let Err(err) = self
            .show(context.buffer, &preview_decorations(&context, &ops))
            .await
        {
            self.abandon(request_id).await;
            return Err(err);
        }

        let displayed = self.transition_from_awaiting(
            request_id,
            PredictionState::DisplayingProposedEdit {
                context: Arc::clone(&context),
                prediction,
            },
        );
        if !displayed {
            debug!(request_id, "prediction superseded while rendering");
            self.clear_decorations().await;
            return Ok(());
        }

        if let Err(err) = self.install_listeners(context.buffer).await {
            warn!("could not install preview listeners: {err}");
        }
        self.host.set_prediction_active(true).await;
        info!(request_id, edits = ops.len(), "displaying proposed edit");
        Ok(())
    }

    /// Apply the displayed prediction. A no-op unless a preview is up.
    pub async fn accept(&self) -> Result<()> {
        let (context, prediction) = {
            let mut state = self.lock_state();
            match std::mem::take(&mut *state) {
                PredictionState::DisplayingProposedEdit {
                    context,
                    prediction,
                } => {
                    *state = PredictionState::Applying {
                        context: Arc::clone(&context),
                        prediction: prediction.clone(),
                    };
                    (context, prediction)
                }
                other => {
                    *state = other;
                    debug!("no proposed edit to accept");
                    return Ok(());
                }
            }
        };

        self.teardown_preview().await;
        let result = self.apply(&context, &prediction).await;
        *self.lock_state() = PredictionState::Idle;
        match &result {
            Ok(()) => info!(buffer = context.buffer, "applied prediction"),
            Err(err) => warn!("prediction not applied: {err}"),
        }
        result
    }

    async fn apply(&self, context: &CapturedContext, prediction: &Prediction) -> Result<()> {
        let live = self
            .host
            .get_lines(context.buffer, context.start_line, context.end_line + 1)
            .await?;
        if live != context.lines {
            return Err(ForesightErr::ContextChanged);
        }

        let resolved = resolve_prediction(&context.text(), prediction)?;
        let new_lines: Vec<String> = resolved.new_text.split('\n').map(str::to_string).collect();
        self.host
            .set_lines(
                context.buffer,
                context.start_line,
                context.end_line + 1,
                new_lines.clone(),
            )
            .await?;

        if self.host.current_buffer().await? == context.buffer {
            let position = offset_to_position(&resolved.new_text, resolved.cursor_offset);
            self.host
                .set_cursor(context.host_point(&new_lines, position))
                .await?;
        }
        Ok(())
    }

    /// Drop the displayed preview. `buffer` is the buffer the dismissal came
    /// from; a dismissal for another buffer is ignored.
    pub async fn dismiss(&self, buffer: Option<BufferId>) -> Result<()> {
        {
            let mut state = self.lock_state();
            let displayed = match &*state {
                PredictionState::DisplayingProposedEdit { context, .. } => context.buffer,
                _ => {
                    debug!("no proposed edit to dismiss");
                    return Ok(());
                }
            };
            if buffer.is_some_and(|b| b != displayed) {
                debug!(displayed, dismissed = ?buffer, "ignoring dismissal for another buffer");
                return Ok(());
            }
            *state = PredictionState::Idle;
        }
        self.teardown_preview().await;
        info!("dismissed proposed edit");
        Ok(())
    }

    async fn namespace(&self) -> Result<NamespaceId> {
        self.namespace
            .get_or_try_init(|| self.host.create_namespace(PREVIEW_NAMESPACE))
            .await
            .copied()
    }

    /// Replace whatever the preview namespace shows with `decorations` in
    /// `buffer`.
    async fn show(&self, buffer: BufferId, decorations: &[Decoration]) -> Result<()> {
        let namespace = self.namespace().await?;
        let mut preview = self.preview.lock().await;
        if let Some(previous) = preview.decorated.take()
            && previous != buffer
        {
            self.host.clear_namespace(previous, namespace).await?;
        }
        self.host.clear_namespace(buffer, namespace).await?;
        preview.decorated = Some(buffer);
        for decoration in decorations {
            self.host.decorate(buffer, namespace, decoration).await?;
        }
        Ok(())
    }

    async fn clear_decorations(&self) {
        let Some(namespace) = self.namespace.get().copied() else {
            return;
        };
        let mut preview = self.preview.lock().await;
        if let Some(buffer) = preview.decorated.take()
            && let Err(err) = self.host.clear_namespace(buffer, namespace).await
        {
            warn!("could not clear preview in buffer {buffer}: {err}");
        }
    }

    async fn install_listeners(&self, buffer: BufferId) -> Result<()> {
        let mut preview = self.preview.lock().await;
        if let Some(existing) = &preview.listeners {
            if existing.buffer == buffer {
                return Ok(());
            }
            self.host.remove_preview_listeners(existing).await?;
            preview.listeners = None;
        }
        let watch_mode_change = self.host.mode().await? == "n";
        preview.listeners = Some(
            self.host
                .install_preview_listeners(buffer, watch_mode_change)
                .await?,
        );
        Ok(())
    }

    async fn teardown_preview(&self) {
        let listeners = self.preview.lock().await.listeners.take();
        if let Some(handle) = listeners
            && let Err(err) = self.host.remove_preview_listeners(&handle).await
        {
            warn!("could not remove preview listeners: {err}");
        }
        self.clear_decorations().await;
        self.host.set_prediction_active(false).await;
    }

    /// Return to idle after a failed request, if `request_id` is still the
    /// live one.
    async fn abandon(&self, request_id: u64) {
        if self.transition_from_awaiting(request_id, PredictionState::Idle) {
            self.clear_decorations().await;
        }
    }

    fn awaiting_context(&self, request_id: u64) -> Option<Arc<CapturedContext>> {
        match &*self.lock_state() {
            PredictionState::AwaitingReply {
                request_id: live,
                context,
            } if *live == request_id => Some(Arc::clone(context)),
            _ => None,
        }
    }

    /// Move to `next` if `request_id` is still the live request.
    fn transition_from_awaiting(&self, request_id: u64, next: PredictionState) -> bool {
        let mut state = self.lock_state();
        let live = matches!(
            &*state,
            PredictionState::AwaitingReply { request_id: live, .. } if *live == request_id
        );
        if live {
            *state = next;
        }
        live
    }
}
