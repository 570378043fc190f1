//! Telegram update handlers.
//!
//! Only allowlisted users are served. Commands may be written `/cmd` or, errbot
//! style, `!cmd`; everything else is ignored.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::warn;

use cbb_core::{domain::UserId, security::is_authorized};

use crate::router::AppState;

mod commands;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| u.id.0);

    if !is_authorized(
        user_id.map(|id| UserId(id as i64)),
        &state.cfg.telegram_allowed_users,
    ) {
        warn!(user_id = ?user_id, chat_id = msg.chat.id.0, "unauthorized message");
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') || text.starts_with('!') {
            return commands::handle_command(msg.chat.id.0, text, state).await;
        }
    }

    Ok(())
}
