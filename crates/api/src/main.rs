//! Budget Tracker - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, settings::Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    init_logging(&settings.logging);

    info!("=== Budget Tracker v{} ===", env!("CARGO_PKG_VERSION"));

    run_server(settings).await
}
