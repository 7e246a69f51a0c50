mod auth;
mod cli;
mod config;
mod error;
mod model;
mod poller;
mod providers;
mod sync;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting buildwatch");
    cli.execute().await?;

    Ok(())
}
