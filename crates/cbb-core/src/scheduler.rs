//! Periodic `certbot renew` trigger.
//!
//! One tokio task owns the timer and awaits each renewal before taking the next
//! tick, so runs never overlap. Ticks missed while a run is in flight are
//! skipped rather than replayed.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    commands,
    config::SharedConfig,
    domain::ChatTarget,
    messaging::{forward_lines, port::MessagingPort, send_line},
    process::ProcessRunner,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    /// Waiting for the next tick.
    Idle,
    /// A renewal is in flight.
    Running,
}

#[derive(Clone)]
pub struct RenewalScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SharedConfig,
    runner: Arc<dyn ProcessRunner>,
    messenger: Arc<dyn MessagingPort>,
    state: tokio::sync::Mutex<SchedulerState>,
}

struct SchedulerState {
    trigger: TriggerState,
    next_run: Option<DateTime<Local>>,
}

/// Cancels the timer task started by [`RenewalScheduler::start`].
pub struct RenewalHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RenewalHandle {
    /// Stop the timer. A renewal already in flight is allowed to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("renewal timer task ended abnormally: {e}");
        }
    }
}

impl RenewalScheduler {
    pub fn new(
        config: SharedConfig,
        runner: Arc<dyn ProcessRunner>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                runner,
                messenger,
                state: tokio::sync::Mutex::new(SchedulerState {
                    trigger: TriggerState::Idle,
                    next_run: None,
                }),
            }),
        }
    }

    /// Arm the recurring timer. The first run happens one full period after start.
    pub async fn start(&self) -> RenewalHandle {
        let period = self.inner.config.snapshot().await.renew_interval();
        self.set_next_run(period).await;

        let cancel = CancellationToken::new();
        let tok = cancel.clone();
        let scheduler = self.clone();
        let first = Instant::now()
            .checked_add(period)
            .unwrap_or_else(Instant::now);
        let handle = tokio::spawn(async move {
            let mut tick = interval_at(first, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                  _ = tok.cancelled() => break,
                  _ = tick.tick() => {
                    // Failures are already logged and announced by run_now.
                    let _ = scheduler.run_now().await;
                    scheduler.set_next_run(period).await;
                  }
                }
            }
            scheduler.inner.state.lock().await.next_run = None;
            info!("renewal timer stopped");
        });

        info!(period_secs = period.as_secs(), "renewal timer started");
        RenewalHandle { cancel, handle }
    }

    /// Run one renewal now and forward its output to the configured channel.
    ///
    /// Returns the number of lines delivered. On failure the error is logged
    /// and a single failure line is sent to the channel before returning it.
    pub async fn run_now(&self) -> Result<usize> {
        self.set_trigger(TriggerState::Running).await;

        let cfg = self.inner.config.snapshot().await;
        let target = ChatTarget::resolve(&cfg.channel);
        info!(channel = %target, "scheduled renewal starting");

        let res = async {
            let mut out = commands::renew_certificates(self.inner.runner.as_ref(), &cfg).await?;
            forward_lines(out.as_mut(), self.inner.messenger.as_ref(), &target).await
        }
        .await;

        match &res {
            Ok(sent) => info!(channel = %target, lines = sent, "scheduled renewal finished"),
            Err(e) => {
                error!(channel = %target, "scheduled renewal failed: {e}");
                let msg = format!("Scheduled renewal failed: {e}");
                if let Err(send_e) = send_line(self.inner.messenger.as_ref(), &target, &msg).await {
                    error!(channel = %target, "failed to send renewal failure notice: {send_e}");
                }
            }
        }

        self.set_trigger(TriggerState::Idle).await;
        res
    }

    pub async fn state(&self) -> TriggerState {
        self.inner.state.lock().await.trigger
    }

    pub async fn next_run(&self) -> Option<DateTime<Local>> {
        self.inner.state.lock().await.next_run
    }

    /// One-line human summary, e.g. for the bot's usage message.
    pub async fn status_line(&self) -> String {
        let st = self.inner.state.lock().await;
        let state = match st.trigger {
            TriggerState::Idle => "idle",
            TriggerState::Running => "running",
        };
        match st.next_run {
            Some(next) => format!(
                "Renewal timer: {state}, next run at {}",
                next.format("%Y-%m-%d %H:%M")
            ),
            None => format!("Renewal timer: {state}, not scheduled"),
        }
    }

    async fn set_trigger(&self, trigger: TriggerState) {
        self.inner.state.lock().await.trigger = trigger;
    }

    async fn set_next_run(&self, period: std::time::Duration) {
        let next = chrono::Duration::from_std(period)
            .ok()
            .map(|d| Local::now() + d);
        self.inner.state.lock().await.next_run = next;
    }
}
