use std::time::Duration;

use foresight_rpc::RpcError;
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForesightErr>;

#[derive(Error, Debug)]
pub enum ForesightErr {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The host answered, but not with the shape we asked for.
    #[error("unexpected result from {method}: {source}")]
    HostDecode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Host hooks need the channel id learned during the handshake.
    #[error("rpc handshake has not completed")]
    NotConnected,

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    #[error("environment variable {0} with the API key is not set")]
    MissingApiKey(String),

    /// The model call succeeded but did not produce the requested tool call.
    #[error("model returned no structured result")]
    NoStructuredResult,

    #[error("model output did not match the expected schema: {0}")]
    InvalidModelOutput(#[source] serde_json::Error),

    #[error("model request timed out after {0} ms")]
    ModelTimeout(u64),

    #[error("the text to replace was not found in the captured context")]
    FindNotFound,

    /// The buffer changed between capturing the context and accepting.
    #[error("buffer changed since the prediction was requested; not applying")]
    ContextChanged,

    #[error("line range {start}-{end} is outside the buffer ({line_count} lines)")]
    LineRangeOutOfBounds {
        start: usize,
        end: usize,
        line_count: usize,
    },

    #[error("invalid arguments for {method}: {message}")]
    InvalidArguments {
        method: &'static str,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForesightErr {
    pub(crate) fn model_timeout(limit: Duration) -> Self {
        ForesightErr::ModelTimeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }
}
