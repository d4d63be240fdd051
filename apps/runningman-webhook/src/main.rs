use std::sync::Arc;

use dotenvy::dotenv;
use runningman_db::ledger::PgLedger;
use runningman_shared::cache::CatalogCache;
use runningman_shared::config::{WebhookConfig, DEFAULT_SUBSCRIPTION_PRICE};
use runningman_shared::notify::TelegramNotifier;
use runningman_shared::payment::PaymentService;
use runningman_webhook::{create_router, AppState};
use teloxide::Bot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "runningman_webhook=info,runningman_shared=info,tower_http=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WebhookConfig::from_env()?;
    let pool = runningman_db::connect(&config.database_url).await?;
    tracing::info!("Database ready");

    // Only reconciles; the price is never used to create invoices here.
    // The cache is local to this process. Tripay settles subscriptions only,
    // which never touch a cached collection, so the bot's copy stays correct.
    let payments = PaymentService::new(
        Arc::new(PgLedger::new(pool)),
        Arc::new(TelegramNotifier::new(Bot::new(&config.bot_token))),
        CatalogCache::new(),
        DEFAULT_SUBSCRIPTION_PRICE,
    );
    let state = AppState::new(payments, config.tripay_private_key.as_str());
    let app = create_router(state, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Webhook listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Webhook stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining requests...");
}
