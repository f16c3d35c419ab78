//! Boot monitor: waits for the hypervisor to come up, then for a shell prompt on the console.
//!
//! ```text
//! WaitingHypervisor --status ready--> WaitingBoot --indicator seen--> Ready
//!        |                                 |
//!        +--readiness timeout--> Failed    +--boot timeout--> Failed
//! ```
//!
//! Both waits poll; each poll is an independent read, so output that has only grown since the
//! previous poll is handled naturally. A cancellation token is checked at every poll boundary.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelResolver, HypervisorStatus};
use crate::error::BootError;

pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shell-prompt signatures, checked in order. Matching is case-insensitive.
pub const DEFAULT_INDICATORS: &[&str] = &["login:", "alpine", "# ", "$ ", "~ #", "/ #"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    HypervisorUnavailable,
    BootTimeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BootState {
    WaitingHypervisor,
    WaitingBoot,
    Ready,
    Failed(FailureReason),
}

impl BootState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootState::Ready | BootState::Failed(_))
    }

    fn rank(&self) -> u8 {
        match self {
            BootState::WaitingHypervisor => 0,
            BootState::WaitingBoot => 1,
            BootState::Ready | BootState::Failed(_) => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootMonitorConfig {
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub boot_timeout: Duration,
    pub poll_interval: Duration,
    pub indicators: Vec<String>,
}

impl Default for BootMonitorConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            readiness_poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            poll_interval: DEFAULT_BOOT_POLL_INTERVAL,
            indicators: DEFAULT_INDICATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootOutcome {
    /// Indicator as configured (original case).
    pub indicator: String,
    pub output: String,
    #[serde(with = "crate::report::duration_ms")]
    pub elapsed: Duration,
}

/// First indicator (in configured order) contained in `output`, ignoring case.
pub fn match_indicator<'a, S: AsRef<str>>(output: &str, indicators: &'a [S]) -> Option<&'a str> {
    let haystack = output.to_lowercase();
    indicators
        .iter()
        .map(AsRef::as_ref)
        .find(|indicator| haystack.contains(&indicator.to_lowercase()))
}

pub struct BootMonitor {
    config: BootMonitorConfig,
    state: BootState,
    hypervisor_ready: bool,
    finished: Option<Result<BootOutcome, BootError>>,
}

impl BootMonitor {
    pub fn new(config: BootMonitorConfig) -> Self {
        Self {
            config,
            state: BootState::WaitingHypervisor,
            hypervisor_ready: false,
            finished: None,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Whether the readiness phase completed (even if the boot phase later failed).
    pub fn hypervisor_ready(&self) -> bool {
        self.hypervisor_ready
    }

    /// Drives the state machine to a terminal state.
    ///
    /// A monitor runs once; calling this again returns the recorded terminal result.
    pub async fn run(
        &mut self,
        resolver: &ChannelResolver,
        cancel: &CancellationToken,
    ) -> Result<BootOutcome, BootError> {
        if let Some(result) = &self.finished {
            return result.clone();
        }

        let result = match self.wait_for_hypervisor(resolver, cancel).await {
            Ok(status) => {
                tracing::debug!(?status, "hypervisor status");
                self.wait_for_boot(resolver, cancel).await
            }
            Err(err) => Err(err),
        };

        self.finished = Some(result.clone());
        result
    }

    fn transition(&mut self, next: BootState) {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            tracing::warn!(
                from = ?self.state,
                to = ?next,
                "ignoring backwards boot state transition"
            );
            return;
        }
        tracing::info!(from = ?self.state, to = ?next, "boot state transition");
        if next == BootState::WaitingBoot {
            self.hypervisor_ready = true;
        }
        self.state = next;
    }

    fn fail(&mut self, reason: FailureReason, err: BootError) -> BootError {
        self.transition(BootState::Failed(reason));
        err
    }

    /// Sleeps until `until`; returns `false` if cancelled first.
    async fn pause(until: Instant, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(until) => true,
        }
    }

    async fn wait_for_hypervisor(
        &mut self,
        resolver: &ChannelResolver,
        cancel: &CancellationToken,
    ) -> Result<HypervisorStatus, BootError> {
        let started = Instant::now();
        let deadline = started + self.config.readiness_timeout;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(self.fail(FailureReason::Cancelled, BootError::Cancelled));
            }

            attempts += 1;
            match tokio::time::timeout_at(deadline, resolver.query_status()).await {
                Ok(Ok(status)) if status.is_ready() => {
                    tracing::info!(attempts, elapsed = ?started.elapsed(), "hypervisor ready");
                    self.transition(BootState::WaitingBoot);
                    return Ok(status);
                }
                Ok(Ok(status)) => {
                    tracing::debug!(attempts, error = ?status.error, "hypervisor not ready")
                }
                Ok(Err(err)) => tracing::debug!(attempts, "status probe failed: {err}"),
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                tracing::warn!(attempts, ?waited, "hypervisor readiness timed out");
                return Err(self.fail(
                    FailureReason::HypervisorUnavailable,
                    BootError::HypervisorUnavailable { waited },
                ));
            }

            let next = (now + self.config.readiness_poll_interval).min(deadline);
            if !Self::pause(next, cancel).await {
                return Err(self.fail(FailureReason::Cancelled, BootError::Cancelled));
            }
        }
    }

    async fn wait_for_boot(
        &mut self,
        resolver: &ChannelResolver,
        cancel: &CancellationToken,
    ) -> Result<BootOutcome, BootError> {
        let started = Instant::now();
        let deadline = started + self.config.boot_timeout;
        let mut last_output = String::new();
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(self.fail(FailureReason::Cancelled, BootError::Cancelled));
            }

            polls += 1;
            match tokio::time::timeout_at(deadline, resolver.console_snapshot()).await {
                Ok(Ok(output)) => {
                    if let Some(indicator) = match_indicator(&output, &self.config.indicators) {
                        let indicator = indicator.to_string();
                        let elapsed = started.elapsed();
                        tracing::info!(%indicator, polls, ?elapsed, "shell prompt detected");
                        self.transition(BootState::Ready);
                        return Ok(BootOutcome {
                            indicator,
                            output,
                            elapsed,
                        });
                    }
                    tracing::debug!(polls, bytes = output.len(), "no prompt yet");
                    last_output = output;
                }
                Ok(Err(err)) => tracing::debug!(polls, "console snapshot failed: {err}"),
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now - started;
                tracing::warn!(polls, ?waited, "boot timed out");
                return Err(self.fail(
                    FailureReason::BootTimeout,
                    BootError::BootTimeout {
                        waited,
                        last_output,
                    },
                ));
            }

            let next = (now + self.config.poll_interval).min(deadline);
            if !Self::pause(next, cancel).await {
                return Err(self.fail(FailureReason::Cancelled, BootError::Cancelled));
            }
        }
    }
}
