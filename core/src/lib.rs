//! Root of the `foresight-core` library: edit prediction and inline edits
//! for an editor reached over msgpack-rpc.

// stdout may carry the rpc stream; everything user-visible goes through the
// host or the tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod app;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod history;
pub mod host;
pub mod inline_edit;
pub mod model;
pub mod position;
pub mod prediction;
mod preview;
pub mod prompt;
pub mod rpc_host;

pub use app::App;
pub use error::ForesightErr;
pub use prediction::Prediction;
pub use prediction::PredictionController;
pub use prediction::PredictionState;
pub use rpc_host::RpcHost;
