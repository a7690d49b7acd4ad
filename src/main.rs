use clap::Parser;
use foreman::cli::{Cli, Commands};
use foreman::config::Config;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| "foreman=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_default();
    init_tracing(&config);

    match cli.command {
        Commands::Run(args) => foreman::cli::run(args).await,
    }
}
