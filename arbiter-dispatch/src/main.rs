use arbiter_dispatch::runner_client::RunnerClient;
use arbiter_dispatch::{worker, Config};

use arbiter_utils::tracing::setup_tracing;

use anyhow::{Context as _, Result};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::task;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    let config = Config::from_env()?;
    info!(?config, "dispatcher configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(config.concurrency as u32 + 1)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    let client = RunnerClient::new(&config.runner_url, config.http_timeout_ms)?;

    for worker_id in 0..config.concurrency {
        task::spawn(worker::worker_loop(worker_id, pool.clone(), client.clone()));
    }
    info!(workers = config.concurrency, "submission workers started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
