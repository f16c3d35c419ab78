use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::injector::InjectionReport;
use crate::monitor::BootState;
use crate::validator::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    HypervisorReady,
    BootComplete,
    CommandInjected,
    OutputValidated,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::HypervisorReady => "hypervisor readiness",
            Step::BootComplete => "boot completion",
            Step::CommandInjected => "command injection",
            Step::OutputValidated => "output validation",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepResults {
    pub hypervisor_ready: bool,
    pub boot_complete: bool,
    pub command_injected: bool,
    pub output_validated: bool,
}

impl StepResults {
    pub fn all(&self) -> bool {
        self.hypervisor_ready
            && self.boot_complete
            && self.command_injected
            && self.output_validated
    }

    pub(crate) fn set(&mut self, step: Step) {
        match step {
            Step::HypervisorReady => self.hypervisor_ready = true,
            Step::BootComplete => self.boot_complete = true,
            Step::CommandInjected => self.command_injected = true,
            Step::OutputValidated => self.output_validated = true,
        }
    }
}

/// Outcome of one golden-path run. Always produced, whether or not the run passed.
#[derive(Debug, Clone, Serialize)]
pub struct GoldenPathReport {
    pub passed: bool,
    pub steps: StepResults,
    pub boot_state: BootState,
    pub matched_indicator: Option<String>,
    pub injection: Option<InjectionReport>,
    pub validation: Option<ValidationReport>,
    /// Most recent console output observed by any step.
    pub last_output: String,
    pub failed_step: Option<Step>,
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl GoldenPathReport {
    pub(crate) fn new() -> Self {
        Self {
            passed: false,
            steps: StepResults::default(),
            boot_state: BootState::WaitingHypervisor,
            matched_indicator: None,
            injection: None,
            validation: None,
            last_output: String::new(),
            failed_step: None,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn fail(&mut self, step: Step, err: impl fmt::Display) {
        let message = format!("{step} failed: {err}");
        tracing::error!("{message}");
        self.failed_step = Some(step);
        self.error = Some(message);
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        self.passed = self.error.is_none() && self.steps.all();
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the pretty-printed report to `path`, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let mut json = self.to_json_pretty()?;
        json.push('\n');
        std::fs::write(path, json)
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
