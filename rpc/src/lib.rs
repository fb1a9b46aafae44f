//! Bidirectional msgpack-rpc session over a single stream.
//!
//! The host can issue requests to us while we are waiting on our own
//! requests to it, so the session multiplexes both directions over one
//! connection and correlates responses purely by id.

mod codec;
mod error;
mod message;
mod session;

pub use codec::MAX_FRAME_LENGTH;
pub use codec::MessageCodec;
pub use error::Result;
pub use error::RpcError;
pub use message::RequestId;
pub use message::RpcMessage;
pub use message::RpcNotification;
pub use message::RpcRequest;
pub use message::RpcResponse;
pub use message::describe_error;
pub use session::ClientInfo;
pub use session::Session;
