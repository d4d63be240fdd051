use teloxide::{dptree, prelude::*, types::Update, utils::command::BotCommands};
use tracing::{error, info, warn};

pub mod callback_data;
pub mod handlers;
pub mod keyboards;
pub mod reply;

use handlers::command::Command;

pub async fn run_bot(
    bot: Bot,
    mut shutdown_signal: tokio::sync::broadcast::Receiver<()>,
    mut state: crate::AppState,
) {
    info!("Bot identity check...");
    match bot.get_me().await {
        Ok(me) => {
            let username = me.username.clone().unwrap_or_default();
            info!("Bot connected as: @{}", username);
            state.bot_username = username;
        }
        Err(e) => {
            error!("CRITICAL: Bot failed to connect to Telegram: {}", e);
            return;
        }
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to publish command list: {}", e);
    }

    let handler = Update::filter_message().endpoint(handlers::command::message_handler);
    let callback_handler =
        Update::filter_callback_query().endpoint(handlers::callback::callback_handler);
    let pre_checkout_handler =
        Update::filter_pre_checkout_query().endpoint(handlers::payment::pre_checkout_handler);

    let mut dispatcher = Dispatcher::builder(
        bot,
        dptree::entry()
            .branch(handler)
            .branch(callback_handler)
            .branch(pre_checkout_handler),
    )
    .dependencies(dptree::deps![state])
    .default_handler(|upd: std::sync::Arc<Update>| async move {
        info!("Unhandled update: {:?}", upd.id);
    })
    .build();

    // Stop polling on signal but let in-flight handlers finish
    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        if shutdown_signal.recv().await.is_err() {
            return;
        }
        info!("Bot received shutdown signal, stopping...");
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => warn!("Dispatcher was not running: {:?}", e),
        }
    });

    dispatcher.dispatch().await;
    info!("Bot dispatcher exited");
}
