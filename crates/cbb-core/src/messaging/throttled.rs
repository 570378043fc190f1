use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    config::ThrottleSettings,
    domain::ChatTarget,
    messaging::port::{MessagingCapabilities, MessagingPort},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per chat (Telegram 1 msg/sec style limits).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

impl From<ThrottleSettings> for ThrottleConfig {
    fn from(s: ThrottleSettings) -> Self {
        Self {
            global_min_interval: s.global_min_interval,
            per_chat_min_interval: s.per_chat_min_interval,
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that rate-limits outbound sends.
///
/// certbot output is forwarded one line per message, so a long `certificates`
/// listing would otherwise trip Telegram's 429 flood control. Waiting here also
/// back-pressures the process reader instead of buffering the whole output.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<ChatTarget, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, target: &ChatTarget) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(target.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, target: &ChatTarget) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(target).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<()> {
        self.throttle_chat(target).await;
        self.inner.send_text(target, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: StdMutex<Vec<(ChatTarget, String, Instant)>>,
    }

    #[async_trait::async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 4096,
                rejects_blank: false,
            }
        }

        async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), text.to_string(), Instant::now()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_sends_to_the_same_chat() {
        let inner = Arc::new(RecordingMessenger::default());
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(10),
                per_chat_min_interval: Duration::from_secs(1),
            },
        );
        let chat = ChatTarget::Id(7);

        throttled.send_text(&chat, "one").await.unwrap();
        throttled.send_text(&chat, "two").await.unwrap();

        let sent = inner.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "one");
        assert_eq!(sent[1].1, "two");
        assert!(sent[1].2.duration_since(sent[0].2) >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn other_chats_only_wait_for_the_global_slot() {
        let inner = Arc::new(RecordingMessenger::default());
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(10),
                per_chat_min_interval: Duration::from_secs(1),
            },
        );

        throttled.send_text(&ChatTarget::Id(1), "a").await.unwrap();
        throttled.send_text(&ChatTarget::Id(2), "b").await.unwrap();

        let sent = inner.sent.lock().unwrap();
        assert!(sent[1].2.duration_since(sent[0].2) < Duration::from_secs(1));
    }
}
