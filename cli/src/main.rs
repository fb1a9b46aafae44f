use clap::Parser;
use foresight_cli::Cli;
use foresight_cli::run_main;

// Handlers and the state machine assume a single executor thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_main(cli).await
}
