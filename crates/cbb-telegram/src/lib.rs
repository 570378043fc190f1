//! Telegram host (teloxide).
//!
//! Implements the `cbb-core` MessagingPort over the Telegram Bot API and routes
//! chat commands into the certbot plugin.

use async_trait::async_trait;

use teloxide::{prelude::*, types::Recipient};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod router;

use cbb_core::{
    domain::ChatTarget,
    errors::Error,
    messaging::port::{MessagingCapabilities, MessagingPort},
    Result,
};

/// Backoff after a 429 before the single retry.
const RETRY_AFTER_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn recipient(target: &ChatTarget) -> Recipient {
        match target {
            ChatTarget::Id(id) => Recipient::Id(teloxide::types::ChatId(*id)),
            ChatTarget::Username(name) => Recipient::ChannelUsername(name.clone()),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(_) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        warn!("telegram flood control hit, retrying once");
                        sleep(RETRY_AFTER_BACKOFF).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: 4096,
            rejects_blank: true,
        }
    }

    async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<()> {
        let recipient = Self::recipient(target);
        self.with_retry(|| self.bot.send_message(recipient.clone(), text.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_targets_to_recipients() {
        assert_eq!(
            TelegramMessenger::recipient(&ChatTarget::Id(-1001)),
            Recipient::Id(teloxide::types::ChatId(-1001))
        );
        assert_eq!(
            TelegramMessenger::recipient(&ChatTarget::resolve("#general")),
            Recipient::ChannelUsername("@general".to_string())
        );
    }
}
