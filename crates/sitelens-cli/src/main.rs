use anyhow::Result;
use clap::Parser;
use sitelens_cli::{Cli, Command, analyze, server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => server::run(args).await,
        Command::Analyze(args) => analyze::run(args).await,
    }
}
