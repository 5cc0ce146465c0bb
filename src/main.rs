mod cli;
mod client;
mod commands;
mod config;
mod model;
#[cfg(test)]
mod test_support;
mod util;
mod workflow;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::ClientConfig;

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::from_args(&cli.global)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        match cli.command {
            Commands::Topics(args) => commands::topics::run(&config, args).await,
            Commands::Random(args) => commands::random::run(&config, args).await,
            Commands::Search(args) => commands::search::run(&config, args).await,
            Commands::Evaluate(args) => commands::evaluate::run(&config, args).await,
            Commands::Answer(args) => commands::answer::run(&config, args).await,
            Commands::Annotate(args) => commands::annotate::run(&config, args).await,
            Commands::Status(args) => commands::status::run(&config, args).await,
            Commands::Session(args) => commands::session::run(&config, args).await,
        }
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
