use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::RequestError;

use crate::payment::Notifier;
use crate::retry::with_retry;

/// Errors worth another attempt: the request may never have reached Telegram.
pub fn is_transient_request_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<()> {
        let bot = &self.bot;
        with_retry(
            || async move {
                bot.send_message(ChatId(user_id), text)
                    .await
                    .map(|_| ())
            },
            is_transient_request_error,
        )
        .await
        .with_context(|| format!("Failed to notify user {}", user_id))
    }
}
