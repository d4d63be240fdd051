use anyhow::Result as AnyhowResult;
use runningman_db::models::user::Customer;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

use crate::bot::handlers::payment::handle_successful_payment;
use crate::bot::keyboards::{collection_keyboard, support_url, url_keyboard, years_keyboard};
use crate::bot::reply::Reply;
use crate::AppState;

#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Running Man Bot commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "show what the bot can do")]
    Help,
    #[command(description = "browse episodes by year")]
    Browse,
    #[command(description = "episodes you own")]
    Collection,
    #[command(description = "contact support")]
    Support,
}

impl Command {
    /// Parses only the command word, so `/start <payload>` still counts as `/start`.
    pub fn from_text(text: &str, bot_username: &str) -> Option<Self> {
        let head = text.split_whitespace().next()?;
        Command::parse(head, bot_username).ok()
    }
}

pub fn welcome_text(first_name: &str) -> String {
    format!(
        "Hi {}! 👋\n\n\
        This bot gives you access to Running Man episodes.\n\n\
        /browse - pick a year and an episode\n\
        /collection - episodes you already own\n\
        /support - talk to us\n\n\
        Buy single episodes with Telegram Stars, or subscribe to watch everything for 30 days.",
        first_name
    )
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    if let Some(payment) = msg.successful_payment() {
        handle_successful_payment(&msg, payment, &state).await;
        return Ok(());
    }

    let (Some(text), Some(from)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };
    let Some(command) = Command::from_text(text, &state.bot_username) else {
        return Ok(());
    };
    info!(user_id = from.id.0, ?command, "Received command");

    let customer = Customer::new(from.id.0 as i64, from.first_name.clone());
    match reply_for(command, msg.chat.id, &customer, &state).await {
        Ok(reply) => {
            if let Err(e) = reply.deliver(&bot).await {
                error!("Failed to answer {:?}: {}", command, e);
            }
        }
        Err(e) => error!("Command {:?} failed for {}: {:#}", command, customer.id, e),
    }
    Ok(())
}

async fn reply_for(
    command: Command,
    chat_id: ChatId,
    customer: &Customer,
    state: &AppState,
) -> AnyhowResult<Reply> {
    match command {
        Command::Start | Command::Help => {
            let user = state.catalog.register(customer).await?;
            Ok(Reply::send(chat_id, welcome_text(&user.first_name)))
        }
        Command::Browse => {
            let years = state.catalog.years().await?;
            if years.is_empty() {
                return Ok(Reply::send(chat_id, "The catalog is empty right now."));
            }
            Ok(Reply::send(chat_id, "Choose a year:").with_keyboard(years_keyboard(&years)))
        }
        Command::Collection => collection_reply(chat_id, None, customer.id, state).await,
        Command::Support => {
            let url = support_url(&state.support_number)?;
            Ok(Reply::send(
                chat_id,
                "Having trouble with a payment or a video? Message us on WhatsApp.",
            )
            .with_keyboard(url_keyboard("💬 Contact support", url)))
        }
    }
}

/// Collection menu as a new message, or in place of `message_id` when given.
pub async fn collection_reply(
    chat_id: ChatId,
    message_id: Option<teloxide::types::MessageId>,
    user_id: i64,
    state: &AppState,
) -> AnyhowResult<Reply> {
    let episodes = state.catalog.collection(user_id).await?;
    let (text, keyboard) = if episodes.is_empty() {
        ("You don't own any episodes yet. Use /browse to find one.", None)
    } else {
        ("Your collection:", Some(collection_keyboard(&episodes)))
    };

    let reply = match message_id {
        Some(id) => Reply::edit(chat_id, id, text),
        None => Reply::send(chat_id, text),
    };
    Ok(match keyboard {
        Some(kb) => reply.with_keyboard(kb),
        None => reply,
    })
}
