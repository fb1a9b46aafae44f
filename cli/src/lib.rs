// stdout carries the rpc stream when the editor starts us as a job.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod config_override;

use std::fs::OpenOptions;
use std::sync::Arc;

use foresight_core::App;
use foresight_core::RpcHost;
use foresight_core::config::Config;
use foresight_core::config::ConfigOverrides;
use foresight_core::host::Host;
use foresight_core::model::AnthropicClient;
use foresight_core::model::ModelClient;
use foresight_rpc::ClientInfo;
use foresight_rpc::Session;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub use cli::Cli;
pub use cli::Transport;
pub use config_override::CliConfigOverrides;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let cli_kv_overrides = cli
        .config_overrides
        .parse_overrides()
        .map_err(anyhow::Error::msg)?;
    let overrides = ConfigOverrides {
        model: cli.model.clone(),
        base_url: cli.base_url.clone(),
    };
    let config = Config::load_with_cli_overrides(cli_kv_overrides, overrides)?;
    let _log_guard = init_logging(&config, cli.debug)?;

    let transport = cli.transport();
    info!(?transport, model = %config.model, "starting foresight");
    let (reader, writer) = open_transport(&transport).await?;

    let session = Session::new(writer);
    let host: Arc<dyn Host> = Arc::new(RpcHost::new(session.clone()));
    let model: Arc<dyn ModelClient> = Arc::new(AnthropicClient::from_config(&config)?);
    let app = App::new(&config, host, model);
    app.register(&session)?;
    session.serve(reader);

    let client = ClientInfo {
        name: "foresight".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(err) = session.handshake(&client).await {
        session.shutdown();
        return Err(err.into());
    }

    session.closed().await;
    info!("editor connection closed; exiting");
    Ok(())
}

async fn open_transport(transport: &Transport) -> std::io::Result<(Reader, Writer)> {
    match transport {
        Transport::Stdio => Ok((Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))),
        #[cfg(unix)]
        Transport::Socket(path) => {
            let (read, write) = tokio::net::UnixStream::connect(path).await?.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        #[cfg(not(unix))]
        Transport::Socket(path) => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unix sockets are not supported here: {}", path.display()),
        )),
        Transport::Tcp(addr) => {
            let (read, write) = tokio::net::TcpStream::connect(addr.as_str())
                .await?
                .into_split();
            Ok((Box::new(read), Box::new(write)))
        }
    }
}

/// Log to `<foresight_home>/log/foresight.log`. The returned guard flushes
/// the writer when dropped.
fn init_logging(config: &Config, debug: bool) -> std::io::Result<WorkerGuard> {
    let log_dir = foresight_core::config::log_dir(config);
    std::fs::create_dir_all(&log_dir)?;
    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // Prompts and buffer contents end up in the log.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_file = log_file_opts.open(log_dir.join("foresight.log"))?;
    let (non_blocking, guard) = non_blocking(log_file);

    let default_filter = if debug {
        "foresight_core=debug,foresight_rpc=debug,foresight_cli=debug"
    } else {
        "foresight_core=info,foresight_rpc=info,foresight_cli=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(file_layer).try_init();
    Ok(guard)
}
