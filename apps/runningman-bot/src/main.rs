use dotenvy::dotenv;
use runningman_shared::config::BotConfig;
use teloxide::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod services;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runningman_bot=info,runningman_shared=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Running Man Bot...");

    let config = BotConfig::from_env()?;
    let pool = runningman_db::connect(&config.database_url).await?;
    tracing::info!("Database ready");

    let bot = Bot::new(&config.bot_token);
    let state = AppState::new(&config, pool, bot.clone())?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        let _ = shutdown_tx.send(());
    });

    bot::run_bot(bot, shutdown_rx, state).await;
    tracing::info!("Running Man Bot stopped");
    Ok(())
}
