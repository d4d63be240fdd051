//! Payment channels used by the bot: native Telegram Stars invoices and
//! Tripay QRIS transactions.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use runningman_shared::notify::is_transient_request_error;
use runningman_shared::payment::{Instrument, InvoiceDraft, PaymentChannel};
use runningman_shared::retry::with_retry;
use runningman_shared::tripay::{NewTransaction, OrderItem, TripayClient, TripayError};
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;
use teloxide::types::LabeledPrice;
use uuid::Uuid;

use crate::bot::keyboards::process_payment_keyboard;
use crate::bot::reply::Reply;

const STARS_CURRENCY: &str = "XTR";

/// Payload carried by a native invoice and echoed back on checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub id: Uuid,
    pub chat_id: i64,
    pub user_id: i64,
    pub episode: Option<i32>,
}

pub struct StarsCheckout {
    bot: Bot,
    chat_id: ChatId,
}

impl StarsCheckout {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl PaymentChannel for StarsCheckout {
    async fn open(&self, draft: &InvoiceDraft) -> Result<Instrument> {
        let payload = serde_json::to_string(&InvoicePayload {
            id: draft.invoice.id,
            chat_id: self.chat_id.0,
            user_id: draft.customer.id,
            episode: draft.invoice.running_man_video_episode,
        })?;
        let amount = u32::try_from(draft.invoice.amount).context("Invoice amount out of range")?;

        let (bot, chat_id) = (&self.bot, self.chat_id);
        let (title, description, payload) = (&draft.title, &draft.description, &payload);
        with_retry(
            || async move {
                bot.send_invoice(
                    chat_id,
                    title.clone(),
                    description.clone(),
                    payload.clone(),
                    STARS_CURRENCY,
                    vec![LabeledPrice {
                        label: title.clone(),
                        amount,
                    }],
                )
                .await
                .map(|_| ())
            },
            is_transient_request_error,
        )
        .await
        .context("Failed to send Stars invoice")?;

        Ok(Instrument::Native)
    }
}

pub struct GatewayCheckout {
    bot: Bot,
    chat_id: ChatId,
    tripay: TripayClient,
}

impl GatewayCheckout {
    pub fn new(bot: Bot, chat_id: ChatId, tripay: TripayClient) -> Self {
        Self {
            bot,
            chat_id,
            tripay,
        }
    }
}

#[async_trait]
impl PaymentChannel for GatewayCheckout {
    async fn open(&self, draft: &InvoiceDraft) -> Result<Instrument> {
        let request = NewTransaction {
            merchant_ref: draft.invoice.id.to_string(),
            amount: draft.invoice.amount,
            customer_name: draft.customer.first_name.clone(),
            order_items: vec![OrderItem {
                name: draft.title.clone(),
                price: draft.invoice.amount,
                quantity: 1,
            }],
        };

        let (tripay, request) = (&self.tripay, &request);
        let transaction = with_retry(
            || async move { tripay.create_transaction(request).await },
            TripayError::is_transient,
        )
        .await?;

        let payment_url = transaction
            .payment_url()
            .ok_or_else(|| anyhow!("Tripay transaction {} has no payment URL", transaction.reference))?
            .to_string();
        let expired_at =
            DateTime::from_timestamp(transaction.expired_time, 0).unwrap_or(draft.invoice.expired_at);

        let text = format!(
            "{}\n{}\n\nAmount: {}\nPay before {}. Press the button below to open the payment page.",
            draft.title,
            draft.description,
            draft.invoice.amount,
            expired_at.format("%Y-%m-%d %H:%M UTC"),
        );
        Reply::send(self.chat_id, text)
            .with_keyboard(process_payment_keyboard(draft.invoice.id))
            .deliver(&self.bot)
            .await
            .context("Failed to send payment message")?;

        Ok(Instrument::Gateway {
            reference: transaction.reference,
            payment_url,
            expired_at,
        })
    }
}
