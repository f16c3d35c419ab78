//! End-to-end golden path: hypervisor readiness, boot, command injection, output validation.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelResolver;
use crate::config::GoldenPathConfig;
use crate::error::GoldenPathError;
use crate::injector::InputInjector;
use crate::monitor::BootMonitor;
use crate::report::{GoldenPathReport, Step};

/// Owns every component of one run; nothing is shared through globals.
pub struct GoldenPathOrchestrator {
    resolver: Arc<ChannelResolver>,
    injector: InputInjector,
    config: GoldenPathConfig,
    cancel: CancellationToken,
}

impl GoldenPathOrchestrator {
    pub fn new(resolver: Arc<ChannelResolver>, config: GoldenPathConfig) -> Self {
        Self {
            injector: InputInjector::new(resolver.clone()),
            resolver,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run at the next poll boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn resolver(&self) -> &Arc<ChannelResolver> {
        &self.resolver
    }

    /// Runs every step in order. Never fails: step errors end up in the report.
    pub async fn run(&self) -> GoldenPathReport {
        let started = Instant::now();
        let mut report = GoldenPathReport::new();

        if let Err((step, err)) = self.drive(&mut report).await {
            report.fail(step, err);
        }

        report.finish(started.elapsed());
        tracing::info!(
            passed = report.passed,
            elapsed = ?report.elapsed,
            failed_step = ?report.failed_step,
            "golden path finished"
        );
        report
    }

    async fn drive(&self, report: &mut GoldenPathReport) -> Result<(), (Step, GoldenPathError)> {
        // Hypervisor readiness and boot completion.
        let mut monitor = BootMonitor::new(self.config.boot.clone());
        let booted = monitor.run(&self.resolver, &self.cancel).await;
        report.boot_state = monitor.state();
        if monitor.hypervisor_ready() {
            report.steps.set(Step::HypervisorReady);
        }
        match booted {
            Ok(outcome) => {
                report.steps.set(Step::BootComplete);
                report.matched_indicator = Some(outcome.indicator);
                report.last_output = outcome.output;
            }
            Err(err) => {
                if let Some(output) = err.last_output() {
                    report.last_output = output.to_string();
                }
                let step = if monitor.hypervisor_ready() {
                    Step::BootComplete
                } else {
                    Step::HypervisorReady
                };
                return Err((step, err.into()));
            }
        }

        // Command injection.
        let baseline = match self.resolver.console_snapshot().await {
            Ok(output) => {
                let len = stable_prefix_len(&output);
                report.last_output = output;
                len
            }
            Err(err) => {
                tracing::debug!("console snapshot before injection failed: {err}");
                stable_prefix_len(&report.last_output)
            }
        };
        if self.cancel.is_cancelled() {
            return Err((Step::CommandInjected, GoldenPathError::Cancelled));
        }
        let injection = self
            .injector
            .inject_text(&self.config.command, self.config.pace)
            .await
            .map_err(|err| (Step::CommandInjected, GoldenPathError::from(err)))?;
        tracing::info!(
            channel = injection.channel,
            chars = injection.delivered,
            "command injected"
        );
        report.injection = Some(injection);
        report.steps.set(Step::CommandInjected);

        // Output capture and validation.
        let output = self
            .capture(baseline, report)
            .await
            .map_err(|err| (Step::OutputValidated, err))?;
        let validation = self
            .config
            .validator
            .validate(&output)
            .map_err(|err| (Step::OutputValidated, GoldenPathError::from(err)))?;
        let primary_pass = validation.primary_pass;
        tracing::info!(
            primary_pass,
            auxiliary = validation.matched_auxiliary.len(),
            compound = ?validation.compound_pass,
            "output validated"
        );
        report.validation = Some(validation);
        if !primary_pass {
            return Err((
                Step::OutputValidated,
                GoldenPathError::OutputMismatch {
                    required: self.config.validator.required().to_string(),
                },
            ));
        }
        report.steps.set(Step::OutputValidated);
        Ok(())
    }

    /// Polls the console until the output written after `baseline` matches the required
    /// pattern and the matching line is complete, or the capture timeout expires, and returns
    /// that output.
    async fn capture(
        &self,
        baseline: usize,
        report: &mut GoldenPathReport,
    ) -> Result<String, GoldenPathError> {
        let deadline = Instant::now() + self.config.capture_timeout;
        let required = self.config.validator.required();
        let mut captured = String::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(GoldenPathError::Cancelled);
            }

            match tokio::time::timeout_at(deadline, self.resolver.console_snapshot()).await {
                Ok(Ok(output)) => {
                    captured = suffix_after(&output, baseline).to_string();
                    report.last_output = output;
                    match required.find_end(&captured) {
                        Some(end) if line_complete(&captured[end..]) => return Ok(captured),
                        Some(_) => tracing::debug!("required output seen, waiting for end of line"),
                        None => {
                            tracing::debug!(bytes = captured.len(), "waiting for command output")
                        }
                    }
                }
                Ok(Err(err)) => tracing::debug!("console snapshot failed: {err}"),
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                if !required.is_match(&captured) {
                    tracing::warn!(bytes = captured.len(), "capture timed out");
                }
                return Ok(captured);
            }
            let next = (now + self.config.capture_poll_interval).min(deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(GoldenPathError::Cancelled),
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }
}

/// Output appended after the first `baseline` bytes. The buffer only grows, so the prefix is
/// stable; a baseline that no longer falls on a character boundary yields the whole output.
fn suffix_after(output: &str, baseline: usize) -> &str {
    output.get(baseline..).unwrap_or(output)
}

/// Length of `output` without trailing replacement characters. A snapshot that ends inside a
/// multi-byte character decodes that tail as U+FFFD, which is rewritten once the rest arrives.
fn stable_prefix_len(output: &str) -> usize {
    output.trim_end_matches('\u{FFFD}').len()
}

/// True once a line terminator follows the required match.
fn line_complete(rest: &str) -> bool {
    rest.contains(['\n', '\r'])
}
