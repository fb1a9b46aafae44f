use thiserror::Error;

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The host answered the request with an error payload.
    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },

    /// The transport is gone; no further messages can be exchanged.
    #[error("rpc session closed: {0}")]
    Closed(String),

    #[error("a request handler for `{0}` is already registered")]
    DuplicateHandler(String),
}

impl RpcError {
    /// Errors of this kind end the session. Everything else is scoped to a
    /// single call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_) | RpcError::Decode(_) | RpcError::Closed(_)
        )
    }
}
