use std::path::PathBuf;

use clap::Parser;

use crate::config_override::CliConfigOverrides;

/// Edit predictions and inline edits for an editor speaking msgpack-rpc.
///
/// By default the editor talks to foresight over stdin/stdout, as it does
/// for a job started with `jobstart(..., { rpc = true })`.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,

    /// Connect to the editor's listening unix socket instead of stdio.
    #[arg(long, value_name = "PATH", conflicts_with = "tcp")]
    pub socket: Option<PathBuf>,

    /// Connect to the editor's listening TCP address instead of stdio.
    #[arg(long, value_name = "HOST:PORT")]
    pub tcp: Option<String>,

    /// Model used for predictions and inline edits.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Base URL of the model API.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Socket(PathBuf),
    Tcp(String),
}

impl Cli {
    pub fn transport(&self) -> Transport {
        match (&self.socket, &self.tcp) {
            (Some(path), _) => Transport::Socket(path.clone()),
            (None, Some(addr)) => Transport::Tcp(addr.clone()),
            (None, None) => Transport::Stdio,
        }
    }
}
