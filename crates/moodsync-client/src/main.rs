//! Headless sync client.

mod cli;

use anyhow::Context;
use clap::Parser;
use moodsync_client::{spawn, ClientConfig, HttpTransport, IdentityCell, SyncHandle};
use moodsync_shared::types::{now_ms, Entry};
use moodsync_store::Database;
use serde_json::json;
use tracing::info;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    moodsync_client::init_tracing();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("failed to open local store")?;

    let base = config.base_url().context("invalid SYNC_SERVER_URL")?;
    let transport = HttpTransport::new(base, config.request_timeout)?;
    let identity = IdentityCell::new(config.init_data.clone());
    let (handle, task) = spawn(db, transport, identity, config.engine_config())?;

    match cli.into_command() {
        Command::Run => {}
        Command::Enable => handle.enable().await?,
        Command::Disable => {
            handle.disable().await?;
            return stop(handle, task).await;
        }
        Command::Record { date, emojis } => {
            let entry = Entry {
                emojis,
                ..Entry::new(date, now_ms())
            };
            let stored = handle.record(entry).await?;
            info!(date = %stored.date, emojis = ?stored.emojis, "entry stored");
        }
        Command::Status => {
            let status = handle.status().await?;
            let report = json!({
                "sync": status,
                "entries": handle.entries()?.len(),
                "username": handle.username()?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return stop(handle, task).await;
        }
        Command::Wipe => {
            handle.reset_local().await?;
            info!("local data erased");
            return stop(handle, task).await;
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    stop(handle, task).await
}

async fn stop(handle: SyncHandle, task: tokio::task::JoinHandle<()>) -> anyhow::Result<()> {
    handle.shutdown().await?;
    task.await?;
    Ok(())
}
