mod commands;
mod config;
mod tracer;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use crate::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; flags and the environment still apply.
    let _ = dotenvy::dotenv();
    tracer::init();

    let config = Config::parse();

    if let Err(e) = commands::run(&config).await {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
