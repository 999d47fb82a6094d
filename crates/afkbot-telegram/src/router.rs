use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use afkbot_core::{config::Config, dispatch::Dispatcher as AfkDispatcher, ports::MessagingPort};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub afk: Arc<AfkDispatcher>,
    pub messenger: Arc<dyn MessagingPort>,
    /// Our own username, so `/cmd@otherbot` is left to that bot.
    pub bot_username: Option<String>,
}

pub async fn run_polling(cfg: Arc<Config>, afk: Arc<AfkDispatcher>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            tracing::info!(username = %me.username(), "afkbot started");
            me.user.username.clone()
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not fetch bot identity");
            None
        }
    };
    tracing::info!(
        data_file = %cfg.data_file.display(),
        rank_config = %cfg.rank_config_file.display(),
        allowed_chats = cfg.telegram_allowed_chats.len(),
        "configuration"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState {
        cfg,
        afk,
        messenger,
        bot_username,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
