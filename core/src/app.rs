//! Binds inbound host events to the prediction controller, the inline
//! editor and the change history.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use foresight_rpc::Session;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::config::Config;
use crate::error::ForesightErr;
use crate::error::Result;
use crate::history::BufferEdit;
use crate::history::ChangeHistory;
use crate::host::Host;
use crate::inline_edit::InlineEditRequest;
use crate::inline_edit::InlineEditor;
use crate::model::ModelClient;
use crate::prediction::PredictionController;

pub const BUFFER_CHANGED: &str = "buffer_changed";
pub const TRIGGER_PREDICTION: &str = "trigger_prediction";
pub const ACCEPT_PREDICTION: &str = "accept_prediction";
pub const PREDICTION_DISMISSED: &str = "prediction_dismissed";
pub const INLINE_EDIT: &str = "inline_edit";

pub struct App {
    host: Arc<dyn Host>,
    history: Arc<Mutex<ChangeHistory>>,
    predictions: Arc<PredictionController>,
    inline_edits: Arc<InlineEditor>,
}

impl App {
    pub fn new(config: &Config, host: Arc<dyn Host>, model: Arc<dyn ModelClient>) -> Self {
        let history = Arc::new(Mutex::new(ChangeHistory::new(config.history_capacity)));
        let predictions = Arc::new(PredictionController::new(
            Arc::clone(&host),
            Arc::clone(&model),
            Arc::clone(&history),
            config.prediction_settings(),
        ));
        let inline_edits = Arc::new(InlineEditor::new(
            Arc::clone(&host),
            model,
            config.prediction_timeout,
        ));
        Self {
            host,
            history,
            predictions,
            inline_edits,
        }
    }

    pub fn predictions(&self) -> &Arc<PredictionController> {
        &self.predictions
    }

    pub fn history(&self) -> &Arc<Mutex<ChangeHistory>> {
        &self.history
    }

    /// Register every inbound handler on `session`. Must run before the
    /// session starts serving.
    pub fn register(&self, session: &Session) -> foresight_rpc::Result<()> {
        let history = Arc::clone(&self.history);
        session.on_notification(BUFFER_CHANGED, move |args| {
            match decode_arg::<BufferEdit>(BUFFER_CHANGED, args) {
                Ok(edit) => {
                    history
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .add(edit);
                }
                Err(err) => warn!("{err}"),
            }
        });

        self.spawn_on(session, TRIGGER_PREDICTION, |predictions, _| async move {
            predictions.trigger().await
        });
        self.spawn_on(session, ACCEPT_PREDICTION, |predictions, _| async move {
            predictions.accept().await
        });
        self.spawn_on(session, PREDICTION_DISMISSED, |predictions, args| async move {
            let buffer = args.first().and_then(Value::as_i64);
            predictions.dismiss(buffer).await
        });

        let inline_edits = Arc::clone(&self.inline_edits);
        session.on_request(INLINE_EDIT, move |args| {
            let inline_edits = Arc::clone(&inline_edits);
            async move {
                let request: InlineEditRequest = decode_arg(INLINE_EDIT, args)?;
                inline_edits.run(&request).await?;
                Ok::<_, anyhow::Error>(json!({ "applied": true }))
            }
        })
    }

    /// Run the controller operation for notification `method` on its own
    /// task, reporting failures to the user.
    fn spawn_on<F, Fut>(&self, session: &Session, method: &'static str, operation: F)
    where
        F: Fn(Arc<PredictionController>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let predictions = Arc::clone(&self.predictions);
        let host = Arc::clone(&self.host);
        session.on_notification(method, move |args| {
            debug!("received {method}");
            let work = operation(Arc::clone(&predictions), args);
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                if let Err(err) = work.await {
                    warn!("{method} failed: {err}");
                    host.report_error(&format!("foresight: {err}")).await;
                }
            });
        });
    }
}

fn decode_arg<T: serde::de::DeserializeOwned>(method: &'static str, args: Vec<Value>) -> Result<T> {
    let arg = args
        .into_iter()
        .next()
        .ok_or_else(|| ForesightErr::InvalidArguments {
            method,
            message: "missing argument".to_string(),
        })?;
    serde_json::from_value(arg).map_err(|e| ForesightErr::InvalidArguments {
        method,
        message: e.to_string(),
    })
}
