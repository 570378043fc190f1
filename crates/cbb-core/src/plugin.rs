//! Plugin lifecycle and command dispatch.
//!
//! The host calls `init` once, `start` to arm the renewal timer, `handle` for
//! each recognized chat command, and `RenewalHandle::stop` on shutdown.

use std::sync::Arc;

use tracing::info;

use crate::{
    commands,
    config::{PluginConfig, SharedConfig},
    domain::ChatTarget,
    messaging::{forward_lines, port::MessagingPort},
    process::{LineStream, ProcessRunner, StaticLines},
    registry,
    scheduler::{RenewalHandle, RenewalScheduler},
    Result,
};

/// A chat command the plugin understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Certificates,
    Help,
    Renew,
    AddCert(String),
    /// The bot's own command list.
    Usage,
}

impl BotCommand {
    /// Map a command name and its free-text arguments to a command.
    ///
    /// Accepts both the short forms (`certificates`, `renew`, `help`) and the
    /// `certbot <sub>` form; `add cert <path>` and `add_cert <path>` both add a
    /// watched path.
    pub fn parse(name: &str, args: &str) -> Option<Self> {
        let args = args.trim();
        match name.trim().to_lowercase().as_str() {
            "certificates" => Some(Self::Certificates),
            "renew" => Some(Self::Renew),
            "help" => Some(Self::Help),
            "start" => Some(Self::Usage),
            "certbot" => {
                let sub = args.split_whitespace().next().unwrap_or("");
                match sub.to_lowercase().as_str() {
                    "certificates" => Some(Self::Certificates),
                    "renew" => Some(Self::Renew),
                    "help" => Some(Self::Help),
                    _ => None,
                }
            }
            "add" => {
                let mut parts = args.splitn(2, char::is_whitespace);
                let sub = parts.next().unwrap_or("");
                if !sub.eq_ignore_ascii_case("cert") {
                    return None;
                }
                Some(Self::AddCert(parts.next().unwrap_or("").trim().to_string()))
            }
            "add_cert" => Some(Self::AddCert(args.to_string())),
            _ => None,
        }
    }
}

const USAGE: &[&str] = &[
    "certbot bot commands:",
    "/certificates - list certificates and their expiry",
    "/renew - renew known certificates",
    "/help - show certbot --help",
    "/add cert <path> - watch a certificate path",
];

pub struct CertbotPlugin {
    config: SharedConfig,
    runner: Arc<dyn ProcessRunner>,
    messenger: Arc<dyn MessagingPort>,
    scheduler: RenewalScheduler,
}

impl CertbotPlugin {
    pub fn init(
        config: PluginConfig,
        runner: Arc<dyn ProcessRunner>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let config = SharedConfig::new(config);
        let scheduler = RenewalScheduler::new(config.clone(), runner.clone(), messenger.clone());
        Self {
            config,
            runner,
            messenger,
            scheduler,
        }
    }

    /// Arm the periodic renewal timer.
    pub async fn start(&self) -> RenewalHandle {
        let cfg = self.config.snapshot().await;
        info!(
            certbot = %cfg.certbot,
            channel = %cfg.channel,
            watched = cfg.cert_paths.len(),
            "certbot plugin starting"
        );
        self.scheduler.start().await
    }

    pub async fn stop(&self, handle: RenewalHandle) {
        handle.stop().await;
    }

    /// Produce the output of `command`. Config is read at call time.
    pub async fn handle(&self, command: BotCommand) -> Result<Box<dyn LineStream>> {
        let cfg = self.config.snapshot().await;
        let runner = self.runner.as_ref();
        match command {
            BotCommand::Certificates => commands::list_certificates(runner, &cfg).await,
            BotCommand::Renew => commands::renew_certificates(runner, &cfg).await,
            BotCommand::Help => Ok(commands::show_help(self.runner.clone(), &cfg)),
            BotCommand::AddCert(path) => {
                let lines = registry::add_path(&self.config, &path).await;
                Ok(Box::new(StaticLines::new(lines)))
            }
            BotCommand::Usage => {
                let mut lines: Vec<String> = USAGE.iter().map(|s| s.to_string()).collect();
                lines.push(self.scheduler.status_line().await);
                Ok(Box::new(StaticLines::new(lines)))
            }
        }
    }

    /// Forward a command's output to `target`, line by line.
    pub async fn deliver(
        &self,
        stream: &mut dyn LineStream,
        target: &ChatTarget,
    ) -> Result<usize> {
        forward_lines(stream, self.messenger.as_ref(), target).await
    }

    pub async fn config_snapshot(&self) -> PluginConfig {
        self.config.snapshot().await
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::FakeRunner;
    use crate::messaging::testing::FakeMessenger;
    use crate::process::collect_lines;
    use std::path::PathBuf;

    fn plugin(lines: &[&str], exit_code: i32) -> (CertbotPlugin, Arc<FakeRunner>, Arc<FakeMessenger>) {
        let runner = Arc::new(FakeRunner::new(lines, exit_code));
        let (messenger, _rx) = FakeMessenger::new(true);
        let messenger = Arc::new(messenger);
        let p = CertbotPlugin::init(PluginConfig::default(), runner.clone(), messenger.clone());
        (p, runner, messenger)
    }

    #[test]
    fn parses_command_surface() {
        assert_eq!(BotCommand::parse("certificates", ""), Some(BotCommand::Certificates));
        assert_eq!(BotCommand::parse("certbot", "renew"), Some(BotCommand::Renew));
        assert_eq!(BotCommand::parse("CERTBOT", " help "), Some(BotCommand::Help));
        assert_eq!(
            BotCommand::parse("add", "cert /etc/ssl/a.pem"),
            Some(BotCommand::AddCert("/etc/ssl/a.pem".to_string()))
        );
        assert_eq!(
            BotCommand::parse("add", "cert"),
            Some(BotCommand::AddCert(String::new()))
        );
        assert_eq!(
            BotCommand::parse("add_cert", "/x"),
            Some(BotCommand::AddCert("/x".to_string()))
        );
        assert_eq!(BotCommand::parse("add", "key /x"), None);
        assert_eq!(BotCommand::parse("certbot", "revoke"), None);
        assert_eq!(BotCommand::parse("stats", ""), None);
    }

    #[tokio::test]
    async fn add_cert_mutates_shared_config() {
        let (p, _runner, _messenger) = plugin(&[], 0);
        let file = PathBuf::from(format!("/tmp/cbb-plugin-{}.pem", std::process::id()));
        std::fs::write(&file, "cert").unwrap();
        let path = file.to_string_lossy().to_string();

        let mut out = p.handle(BotCommand::AddCert(path.clone())).await.unwrap();
        let lines = collect_lines(out.as_mut()).await.unwrap();
        assert!(lines[0].contains("Added new cert"));

        let mut out = p.handle(BotCommand::AddCert(path.clone())).await.unwrap();
        let lines = collect_lines(out.as_mut()).await.unwrap();
        assert!(lines[0].contains("already in cert_paths"));

        assert_eq!(p.config_snapshot().await.cert_paths, vec![path]);
        let _ = std::fs::remove_file(file);
    }

    #[tokio::test]
    async fn config_changes_apply_to_the_next_invocation() {
        let (p, runner, _messenger) = plugin(&[], 0);

        p.config
            .update(|cfg| cfg.certbot = "/usr/local/bin/certbot".to_string())
            .await;
        let mut out = p.handle(BotCommand::Help).await.unwrap();
        collect_lines(out.as_mut()).await.unwrap();

        assert_eq!(runner.calls()[0].program, "/usr/local/bin/certbot");
    }

    #[tokio::test]
    async fn manual_renew_matches_scheduled_output() {
        let (p, _runner, messenger) = plugin(&["a", "b"], 0);

        let mut out = p.handle(BotCommand::Renew).await.unwrap();
        let manual = collect_lines(out.as_mut()).await.unwrap();
        p.scheduler().run_now().await.unwrap();

        assert_eq!(manual, messenger.texts());
    }

    #[tokio::test]
    async fn deliver_sends_output_to_invoking_chat() {
        let (p, _runner, messenger) = plugin(&["Found the following certs:"], 0);
        let chat = ChatTarget::Id(42);

        let mut out = p.handle(BotCommand::Certificates).await.unwrap();
        let n = p.deliver(out.as_mut(), &chat).await.unwrap();

        assert_eq!(n, 2);
        assert_eq!(messenger.texts(), vec!["Found the following certs:", "Done!"]);
    }

    #[tokio::test]
    async fn usage_lists_commands_and_timer_status() {
        let (p, _runner, _messenger) = plugin(&[], 0);
        let mut out = p.handle(BotCommand::Usage).await.unwrap();
        let lines = collect_lines(out.as_mut()).await.unwrap();
        assert!(lines.iter().any(|l| l.contains("/add cert")));
        assert!(lines.last().unwrap().starts_with("Renewal timer:"));
    }
}
