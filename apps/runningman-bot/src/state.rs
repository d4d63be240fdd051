use std::sync::Arc;

use anyhow::Result;
use runningman_db::ledger::PgLedger;
use runningman_db::sqlx::PgPool;
use runningman_shared::cache::CatalogCache;
use runningman_shared::config::BotConfig;
use runningman_shared::link::LinkSigner;
use runningman_shared::notify::TelegramNotifier;
use runningman_shared::payment::PaymentService;
use runningman_shared::tripay::TripayClient;
use teloxide::Bot;

use crate::services::catalog_service::CatalogService;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogService,
    pub payments: PaymentService,
    pub tripay: TripayClient,
    pub support_number: String,
    pub bot_username: String,
}

impl AppState {
    pub fn new(config: &BotConfig, pool: PgPool, bot: Bot) -> Result<Self> {
        let cache = CatalogCache::new();
        let signer = LinkSigner::new(
            config.direct_embed_base_url.clone(),
            config.token_auth_keys.clone(),
        );
        let payments = PaymentService::new(
            Arc::new(PgLedger::new(pool.clone())),
            Arc::new(TelegramNotifier::new(bot)),
            cache.clone(),
            config.subscription_price,
        );

        Ok(Self {
            catalog: CatalogService::new(pool, cache, signer),
            payments,
            tripay: TripayClient::new(&config.tripay)?,
            support_number: config.support_number.clone(),
            bot_username: String::new(),
        })
    }
}
