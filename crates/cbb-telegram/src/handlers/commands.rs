use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info};

use cbb_core::{domain::ChatTarget, messaging::send_line as send_capped, plugin::BotCommand};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches(['/', '!'])
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Run a command and stream its output back to the invoking chat.
///
/// A failing certbot run is reported after whatever output it produced.
pub async fn handle_command(chat_id: i64, text: &str, state: Arc<AppState>) -> ResponseResult<()> {
    let target = ChatTarget::Id(chat_id);
    let (cmd, arg) = parse_command(text);

    let Some(command) = BotCommand::parse(&cmd, &arg) else {
        send_line(&state, &target, &format!("Unknown command: {cmd}")).await;
        return Ok(());
    };

    info!(chat_id, command = ?command, "handling command");

    let res = match state.plugin.handle(command).await {
        Ok(mut out) => state.plugin.deliver(out.as_mut(), &target).await,
        Err(e) => Err(e),
    };

    if let Err(e) = res {
        error!(chat_id, "command failed: {e}");
        send_line(&state, &target, &format!("Command failed: {e}")).await;
    }

    Ok(())
}

async fn send_line(state: &AppState, target: &ChatTarget, text: &str) {
    if let Err(e) = send_capped(state.messenger.as_ref(), target, text).await {
        error!(chat = %target, "failed to send reply: {e}");
    }
}
