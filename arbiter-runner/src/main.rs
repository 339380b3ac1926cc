use arbiter_runner::app::App;
use arbiter_runner::seed::{parse_seed_challenges, EMBEDDED_CHALLENGES};
use arbiter_runner::store::Store;
use arbiter_runner::worker::WorkerPool;
use arbiter_runner::{lang, server, Config};

use arbiter_utils::tracing::setup_tracing;

use anyhow::Result;
use dotenv::dotenv;
use tracing::info;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    let config = Config::from_env()?;
    info!(?config, "runner configuration loaded");

    let store = Store::connect(&config.database_url).await?;
    let seeds = parse_seed_challenges(EMBEDDED_CHALLENGES)?;
    store.seed_challenges(&seeds).await?;

    let pool = WorkerPool::start(config.workers, config.queue_size, lang::execute);

    App {
        config,
        store,
        pool,
    }
    .install();

    server::run_server().await
}
