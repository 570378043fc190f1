//! Chat-host abstractions (Telegram today).

pub mod port;
pub mod throttled;

use crate::{domain::ChatTarget, process::LineStream, Result};

use port::MessagingPort;

/// Forward every line of `stream` to `target`, in order, as it is read.
///
/// Returns the number of messages sent. A send failure stops forwarding; a
/// command failure is returned after all preceding lines were delivered.
pub async fn forward_lines(
    stream: &mut dyn LineStream,
    messenger: &dyn MessagingPort,
    target: &ChatTarget,
) -> Result<usize> {
    let caps = messenger.capabilities();
    let mut sent = 0usize;

    while let Some(line) = stream.next_line().await? {
        if caps.rejects_blank && line.trim().is_empty() {
            continue;
        }
        send_line(messenger, target, &line).await?;
        sent += 1;
    }

    Ok(sent)
}

/// Send one line, cut down to what the host accepts.
///
/// Use this for free-form text such as error notices, whose length depends on
/// what a failing command wrote to stderr.
pub async fn send_line(messenger: &dyn MessagingPort, target: &ChatTarget, text: &str) -> Result<()> {
    let caps = messenger.capabilities();
    let text = truncate_chars(text, caps.max_message_len);
    messenger.send_text(target, &text).await
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out = s.chars().take(keep).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::port::{MessagingCapabilities, MessagingPort};
    use crate::{domain::ChatTarget, Error, Result};

    pub const MAX_LEN: usize = 40;

    /// Records sends and mirrors them into a channel so async tests can wait.
    /// Like a real host, it rejects text over its advertised limit.
    pub struct FakeMessenger {
        pub sent: Mutex<Vec<(ChatTarget, String)>>,
        tx: mpsc::UnboundedSender<String>,
        rejects_blank: bool,
    }

    impl FakeMessenger {
        pub fn new(rejects_blank: bool) -> (Self, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    sent: Mutex::new(Vec::new()),
                    tx,
                    rejects_blank,
                },
                rx,
            )
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: MAX_LEN,
                rejects_blank: self.rejects_blank,
            }
        }

        async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<()> {
            if text.chars().count() > MAX_LEN {
                return Err(Error::External("message is too long".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), text.to_string()));
            let _ = self.tx.send(text.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeMessenger, MAX_LEN};
    use super::*;
    use crate::process::{FramedLines, StaticLines};

    #[tokio::test]
    async fn forwards_lines_in_order_to_target() {
        let (messenger, _rx) = FakeMessenger::new(false);
        let mut stream = FramedLines::new(Box::new(StaticLines::new(["a", "b"]))).trailing("Done!");
        let target = ChatTarget::resolve("#general");

        let n = forward_lines(&mut stream, &messenger, &target).await.unwrap();

        assert_eq!(n, 3);
        assert_eq!(messenger.texts(), vec!["a", "b", "Done!"]);
        let sent = messenger.sent.lock().unwrap();
        assert!(sent.iter().all(|(t, _)| *t == target));
    }

    #[tokio::test]
    async fn skips_blank_lines_when_host_rejects_them() {
        let (messenger, _rx) = FakeMessenger::new(true);
        let mut stream = StaticLines::new(["a", "", "  ", "b"]);

        let n = forward_lines(&mut stream, &messenger, &ChatTarget::Id(1))
            .await
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(messenger.texts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn truncates_lines_over_the_host_limit() {
        let (messenger, _rx) = FakeMessenger::new(false);
        let mut stream = StaticLines::new(["x".repeat(50)]);

        forward_lines(&mut stream, &messenger, &ChatTarget::Id(1))
            .await
            .unwrap();

        let texts = messenger.texts();
        assert_eq!(texts[0].chars().count(), MAX_LEN);
        assert!(texts[0].ends_with("..."));
    }

    #[tokio::test]
    async fn oversized_notice_is_cut_to_fit_instead_of_rejected() {
        let (messenger, _rx) = FakeMessenger::new(true);
        let target = ChatTarget::Id(7);
        let notice = format!("Command failed: {}", "e".repeat(16 * 1024));

        assert!(messenger.send_text(&target, &notice).await.is_err());
        send_line(&messenger, &target, &notice).await.unwrap();

        let texts = messenger.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Command failed: "));
        assert_eq!(texts[0].chars().count(), MAX_LEN);
    }
}
