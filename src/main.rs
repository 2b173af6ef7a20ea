// Service runner: configuration, logging, database, background workers.
// RPC surfaces wrap the FileService from their own binaries; this one just
// keeps the index pipeline alive.

use anyhow::Result;
use clap::Parser;
use fileio::application::{application::Application, config::configuration::Configuration};
use tokio::sync::watch;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();

    Application::install_logging(&configuration);
    debug!("installed logging to local file");

    let application = Application::initialize(configuration).await?;
    info!(
        workers = application.config.index_workers,
        "fileio service initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = application.spawn_workers(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
