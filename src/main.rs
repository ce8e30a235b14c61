mod config;
mod handlers;
mod schema;
mod storage;
mod tg;
mod tmdb;

use dotenvy::dotenv;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env()?;
    info!(?config, "configuration loaded");

    let store = storage::UsageStore::connect(&config.database_url).await?;
    let tmdb = tmdb::TmdbClient::new(
        config.tmdb_api_key.clone(),
        config.tmdb_base_url.clone(),
        config.image_base_url.clone(),
    );
    let handlers = handlers::Handlers::new(store.clone(), tmdb, config.admin_id);

    let bot = Bot::new(&config.bot_token);
    tg::run(bot, handlers).await;

    store.close().await;
    Ok(())
}
