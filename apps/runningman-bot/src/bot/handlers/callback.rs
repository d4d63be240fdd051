use anyhow::Result as AnyhowResult;
use reqwest::Url;
use runningman_db::models::catalog::VideoListing;
use runningman_db::models::user::Customer;
use runningman_shared::link::link_message;
use runningman_shared::payment::{DeniedReason, InvoiceOutcome, PaymentError};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, MessageId};
use tracing::{error, info, warn};

use crate::bot::callback_data::CallbackData;
use crate::bot::handlers::command::collection_reply;
use crate::bot::keyboards::{
    collection_item_keyboard, episodes_keyboard, url_keyboard, video_item_keyboard, years_keyboard,
};
use crate::bot::reply::Reply;
use crate::services::catalog_service::LinkOutcome;
use crate::services::checkout::{GatewayCheckout, StarsCheckout};
use crate::AppState;

/// Where the pressed button lives.
struct Origin {
    chat_id: ChatId,
    message_id: MessageId,
    customer: Customer,
}

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let callback_id = q.id.clone();
    if let Err(e) = bot.answer_callback_query(callback_id).await {
        warn!("Failed to answer callback query: {}", e);
    }

    let Some(raw) = q.data.as_deref() else {
        return Ok(());
    };
    let data = match raw.parse::<CallbackData>() {
        Ok(data) => data,
        Err(e) => {
            warn!("Dropping callback {:?}: {}", raw, e);
            return Ok(());
        }
    };
    let Some(msg) = q.message.as_ref() else {
        return Ok(());
    };

    let origin = Origin {
        chat_id: msg.chat().id,
        message_id: msg.id(),
        customer: Customer::new(q.from.id.0 as i64, q.from.first_name.clone()),
    };
    info!(user_id = origin.customer.id, %data, "Received callback");

    match route(&bot, data, &origin, &state).await {
        Ok(Some(reply)) => {
            if let Err(e) = reply.deliver(&bot).await {
                error!("Failed to answer callback {}: {}", data, e);
            }
        }
        Ok(None) => {}
        Err(e) => error!("Callback {} failed for {}: {:#}", data, origin.customer.id, e),
    }
    Ok(())
}

async fn route(
    bot: &Bot,
    data: CallbackData,
    origin: &Origin,
    state: &AppState,
) -> AnyhowResult<Option<Reply>> {
    let Origin {
        chat_id,
        message_id,
        customer,
    } = origin;
    let (chat_id, message_id) = (*chat_id, *message_id);

    let reply = match data {
        CallbackData::Libraries => {
            let years = state.catalog.years().await?;
            Reply::edit(chat_id, message_id, "Choose a year:").with_keyboard(years_keyboard(&years))
        }

        CallbackData::VideoList { year } => {
            let episodes = state.catalog.episodes(year).await?;
            let text = if episodes.is_empty() {
                format!("No episodes from {} yet.", year)
            } else {
                format!("Running Man {}, choose an episode:", year)
            };
            Reply::edit(chat_id, message_id, text).with_keyboard(episodes_keyboard(year, &episodes))
        }

        CallbackData::VideoItem { episode, .. } => {
            let Some(listing) = state.catalog.listing(episode).await? else {
                return Ok(Some(Reply::send(chat_id, "That episode is not available.")));
            };
            let has_access = state.catalog.has_access(customer.id, episode).await?;
            Reply::edit(chat_id, message_id, video_item_text(&listing, has_access)).with_keyboard(
                video_item_keyboard(listing.year, listing.episode, has_access),
            )
        }

        CallbackData::VideoLink { episode } => {
            match state.catalog.sign_link(customer.id, episode).await? {
                LinkOutcome::Link(link) => Reply::send(chat_id, link_message(episode, &link)),
                LinkOutcome::NoAccess => Reply::send(
                    chat_id,
                    format!("You don't have access to episode {}. Buy it or subscribe first.", episode),
                ),
                LinkOutcome::UnknownEpisode => Reply::send(chat_id, "That episode is not available."),
            }
        }

        CallbackData::Invoice { year, episode } => {
            let channel = StarsCheckout::new(bot.clone(), chat_id);
            let outcome = state
                .payments
                .create_purchase_invoice(customer, year, episode, &channel)
                .await?;
            match outcome {
                InvoiceOutcome::Created(_) => return Ok(None),
                InvoiceOutcome::Denied(reason) => Reply::send(chat_id, denied_text(reason, Some(episode))),
            }
        }

        CallbackData::SubscriptionInvoice => {
            let channel = GatewayCheckout::new(bot.clone(), chat_id, state.tripay.clone());
            let outcome = state
                .payments
                .create_subscription_invoice(customer, &channel)
                .await?;
            match outcome {
                InvoiceOutcome::Created(_) => return Ok(None),
                InvoiceOutcome::Denied(reason) => Reply::send(chat_id, denied_text(reason, None)),
            }
        }

        CallbackData::InvoiceProcessor { invoice_id } => {
            match state.payments.validate_invoice(invoice_id).await {
                Ok(v) if v.used => Reply::send(chat_id, "This invoice was already processed."),
                Ok(v) if v.expired => Reply::send(
                    chat_id,
                    "This invoice has expired. Please create a new one.",
                ),
                Ok(_) => match state.payments.payable_url(invoice_id).await? {
                    Some(url) => {
                        let url: Url = url.parse()?;
                        Reply::send(chat_id, "Open the payment page to finish paying:")
                            .with_keyboard(url_keyboard("💳 Pay now", url))
                    }
                    None => Reply::send(chat_id, "This invoice has no payment page."),
                },
                Err(PaymentError::UnknownInvoice(_)) => {
                    Reply::send(chat_id, "This invoice is no longer valid.")
                }
                Err(e) => return Err(e.into()),
            }
        }

        CallbackData::VideoCollection => {
            collection_reply(chat_id, Some(message_id), customer.id, state).await?
        }

        CallbackData::VideoCollectionItem { episode } => Reply::edit(
            chat_id,
            message_id,
            format!("Create a viewing link for Running Man episode {}?", episode),
        )
        .with_keyboard(collection_item_keyboard(episode)),
    };

    Ok(Some(reply))
}

/// The year comes from the episode's library, not from the button that led here.
fn video_item_text(listing: &VideoListing, has_access: bool) -> String {
    if has_access {
        format!(
            "Running Man episode {} ({}). Ready to watch?",
            listing.episode, listing.year
        )
    } else {
        format!(
            "Running Man episode {} ({})\nPrice: {} Stars before tax.\n\nBuy this episode, or subscribe to watch every episode.",
            listing.episode, listing.year, listing.price
        )
    }
}

pub fn denied_text(reason: DeniedReason, episode: Option<i32>) -> String {
    match (reason, episode) {
        (DeniedReason::AlreadyOwned, Some(ep)) => format!(
            "You already own Running Man episode {}. Find it in /collection.",
            ep
        ),
        (DeniedReason::AlreadyOwned, None) => "You already own this.".to_string(),
        (DeniedReason::InvoiceAlreadyValid, Some(ep)) => format!(
            "You still have an unpaid invoice for episode {}. Pay it, or wait until it expires after 1 hour.",
            ep
        ),
        (DeniedReason::InvoiceAlreadyValid, None) => {
            "You still have an unpaid subscription invoice. Pay it, or wait until it expires.".to_string()
        }
        (DeniedReason::UnknownEpisode, _) => "That episode is not available.".to_string(),
    }
}
