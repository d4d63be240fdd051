use runningman_shared::notify::is_transient_request_error;
use runningman_shared::retry::with_retry;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId};
use teloxide::{ApiError, RequestError};

/// What a handler wants shown: a new message, or an in-place edit of the menu it came from.
#[derive(Debug, Clone)]
pub enum Reply {
    Send {
        chat_id: ChatId,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    },
}

impl Reply {
    pub fn send(chat_id: ChatId, text: impl Into<String>) -> Self {
        Reply::Send {
            chat_id,
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn edit(chat_id: ChatId, message_id: MessageId, text: impl Into<String>) -> Self {
        Reply::Edit {
            chat_id,
            message_id,
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, markup: InlineKeyboardMarkup) -> Self {
        match &mut self {
            Reply::Send { keyboard, .. } | Reply::Edit { keyboard, .. } => *keyboard = Some(markup),
        }
        self
    }

    pub async fn deliver(&self, bot: &Bot) -> Result<(), RequestError> {
        with_retry(|| async move { self.deliver_once(bot).await }, is_transient_request_error).await
    }

    async fn deliver_once(&self, bot: &Bot) -> Result<(), RequestError> {
        match self {
            Reply::Send {
                chat_id,
                text,
                keyboard,
            } => {
                let mut req = bot.send_message(*chat_id, text.clone());
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb.clone());
                }
                req.await.map(|_| ())
            }
            Reply::Edit {
                chat_id,
                message_id,
                text,
                keyboard,
            } => {
                let mut req = bot.edit_message_text(*chat_id, *message_id, text.clone());
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb.clone());
                }
                match req.await {
                    Ok(_) => Ok(()),
                    // Pressing the same button twice
                    Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::keyboards::years_keyboard;

    #[test]
    fn keyboard_attaches_to_either_variant() {
        let send = Reply::send(ChatId(1), "hi").with_keyboard(years_keyboard(&[2015]));
        assert!(matches!(send, Reply::Send { keyboard: Some(_), .. }));

        let edit = Reply::edit(ChatId(1), MessageId(5), "hi").with_keyboard(years_keyboard(&[2015]));
        match edit {
            Reply::Edit {
                message_id,
                keyboard,
                ..
            } => {
                assert_eq!(message_id, MessageId(5));
                assert!(keyboard.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
