//! Fixed certbot invocations built from the config at call time.

use std::sync::Arc;

use tracing::info;

use crate::{
    config::PluginConfig,
    process::{DeferredRun, FramedLines, Invocation, LineStream, ProcessRunner},
    Result,
};

/// Trailing line marking that a certbot command finished.
pub const DONE: &str = "Done!";
pub const HELP_ANNOUNCEMENT: &str = "Asking certbot for help...";

pub fn certificates_invocation(cfg: &PluginConfig) -> Invocation {
    Invocation::prefixed(cfg.sudo_prefix(), &cfg.certbot, &["certificates"])
}

pub fn renew_invocation(cfg: &PluginConfig) -> Invocation {
    Invocation::prefixed(
        cfg.sudo_prefix(),
        &cfg.certbot,
        &["renew", "--non-interactive"],
    )
}

pub fn help_invocation(cfg: &PluginConfig) -> Invocation {
    Invocation::prefixed(None, &cfg.certbot, &["--help"])
}

/// `certbot certificates`, then `Done!`.
pub async fn list_certificates(
    runner: &dyn ProcessRunner,
    cfg: &PluginConfig,
) -> Result<Box<dyn LineStream>> {
    let inv = certificates_invocation(cfg);
    info!(command = %inv, "listing certificates");
    let out = runner.run(&inv).await?;
    Ok(Box::new(FramedLines::new(out).trailing(DONE)))
}

/// `certbot renew --non-interactive`, then `Done!`.
///
/// Used by both the manual command and the renewal timer.
pub async fn renew_certificates(
    runner: &dyn ProcessRunner,
    cfg: &PluginConfig,
) -> Result<Box<dyn LineStream>> {
    let inv = renew_invocation(cfg);
    info!(command = %inv, "renewing certificates");
    let out = runner.run(&inv).await?;
    Ok(Box::new(FramedLines::new(out).trailing(DONE)))
}

/// Announcement line, then `certbot --help` (never escalated, no trailer).
///
/// certbot is only launched once the announcement has been pulled, so a launch
/// failure is reported after it.
pub fn show_help(runner: Arc<dyn ProcessRunner>, cfg: &PluginConfig) -> Box<dyn LineStream> {
    let inv = help_invocation(cfg);
    info!(command = %inv, "asking for help");
    Box::new(FramedLines::new(Box::new(DeferredRun::new(runner, inv))).leading(HELP_ANNOUNCEMENT))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;

    use crate::{
        process::{Invocation, LineStream, ProcessRunner},
        Error, Result,
    };

    /// Fake runner: records invocations and replays a canned output.
    pub struct FakeRunner {
        pub lines: Vec<String>,
        pub exit_code: i32,
        pub stderr: String,
        pub calls: Mutex<Vec<Invocation>>,
    }

    impl FakeRunner {
        pub fn new(lines: &[&str], exit_code: i32) -> Self {
            Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                exit_code,
                stderr: "boom".to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
            self.stderr = stderr.into();
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct FakeOutput {
        lines: VecDeque<String>,
        exit_code: Option<i32>,
        program: String,
        stderr: String,
    }

    #[async_trait]
    impl LineStream for FakeOutput {
        async fn next_line(&mut self) -> Result<Option<String>> {
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }
            match self.exit_code.take() {
                Some(code) if code > 0 => Err(Error::Command {
                    program: self.program.clone(),
                    code,
                    stderr: self.stderr.clone(),
                }),
                _ => Ok(None),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, invocation: &Invocation) -> Result<Box<dyn LineStream>> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(Box::new(FakeOutput {
                lines: self.lines.iter().cloned().collect(),
                exit_code: Some(self.exit_code),
                program: invocation.program.clone(),
                stderr: self.stderr.clone(),
            }))
        }
    }

    /// Runner whose spawn always fails, like a missing `sudo`.
    pub struct BrokenRunner;

    #[async_trait]
    impl ProcessRunner for BrokenRunner {
        async fn run(&self, _invocation: &Invocation) -> Result<Box<dyn LineStream>> {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file",
            )))
        }
    }
}
