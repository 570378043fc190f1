use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use cbb_core::{
    config::BotConfig,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    plugin::CertbotPlugin,
    process::ProcessRunner,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<BotConfig>,
    pub plugin: Arc<CertbotPlugin>,
    pub messenger: Arc<dyn MessagingPort>,
}

/// Run the bot until Ctrl-C: arm the renewal timer, then long-poll Telegram.
pub async fn run_polling(cfg: Arc<BotConfig>, runner: Arc<dyn ProcessRunner>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!("cbb started: @{}", me.username()),
        Err(e) => warn!("could not fetch bot identity: {e}"),
    }
    info!(
        certbot = %cfg.plugin.certbot,
        channel = %cfg.plugin.channel,
        allowed_users = cfg.telegram_allowed_users.len(),
        "configuration loaded"
    );

    // Every line is its own message, so all outbound traffic goes through the
    // throttle; the adapter still retries once on a 429.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::from(cfg.throttle),
    ));

    let plugin = Arc::new(CertbotPlugin::init(
        cfg.plugin.clone(),
        runner,
        messenger.clone(),
    ));
    let renewal = plugin.start().await;

    let state = Arc::new(AppState {
        cfg,
        plugin: plugin.clone(),
        messenger,
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    plugin.stop(renewal).await;
    info!("cbb stopped");
    Ok(())
}
