use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::injector::Pace;
use crate::monitor::{BootMonitorConfig, DEFAULT_INDICATORS};
use crate::validator::{CompoundCheck, OutputValidator, Pattern};

pub const DEFAULT_COMMAND: &str = "uname -a";
pub const DEFAULT_REQUIRED_PATTERN: &str = "/riscv64/i";
pub const DEFAULT_AUXILIARY_PATTERNS: &[&str] = &["/linux/i", "/alpine/i"];
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
#[command(
    name = "rvdesk-golden",
    version,
    about = "Boot a RISC-V guest over the tool bridge, run a command and verify its output"
)]
pub struct Args {
    /// How long to wait for the hypervisor to report ready.
    ///
    /// Environment variable: `RVDESK_READINESS_TIMEOUT_MS`.
    #[arg(long, env = "RVDESK_READINESS_TIMEOUT_MS", default_value_t = 10_000)]
    readiness_timeout_ms: u64,

    /// Interval between hypervisor status probes.
    #[arg(long, env = "RVDESK_READINESS_POLL_MS", default_value_t = 250)]
    readiness_poll_ms: u64,

    /// How long to wait for a shell prompt once the hypervisor is ready.
    ///
    /// Environment variable: `RVDESK_BOOT_TIMEOUT_MS`.
    #[arg(long, env = "RVDESK_BOOT_TIMEOUT_MS", default_value_t = 45_000)]
    boot_timeout_ms: u64,

    /// Interval between console snapshots while waiting for the prompt.
    #[arg(long, env = "RVDESK_BOOT_POLL_MS", default_value_t = 1_000)]
    boot_poll_ms: u64,

    /// How long to wait for command output after typing the command.
    #[arg(long, env = "RVDESK_CAPTURE_TIMEOUT_MS", default_value_t = 5_000)]
    capture_timeout_ms: u64,

    /// Delay after each key press.
    #[arg(long, env = "RVDESK_PRESS_MS", default_value_t = 50)]
    press_ms: u32,

    /// Delay after each key release.
    #[arg(long, env = "RVDESK_RELEASE_MS", default_value_t = 50)]
    release_ms: u32,

    /// Shell-prompt indicator (repeatable; checked in order, case-insensitive).
    ///
    /// Defaults to `login:`, `alpine`, `# `, `$ `, `~ #`, `/ #`.
    #[arg(long = "indicator", env = "RVDESK_INDICATORS", value_delimiter = ',')]
    indicators: Vec<String>,

    /// Command typed into the guest shell. A trailing newline is added.
    #[arg(long, env = "RVDESK_COMMAND", default_value = DEFAULT_COMMAND)]
    command: String,

    /// Pattern the command output must match (`/source/flags` or a bare regex).
    #[arg(long, env = "RVDESK_EXPECT", default_value = DEFAULT_REQUIRED_PATTERN)]
    expect: String,

    /// Informational pattern (repeatable). Reported, never affects the verdict.
    #[arg(long = "aux", env = "RVDESK_AUX", value_delimiter = ',')]
    auxiliary: Vec<String>,

    /// Also report whether the output has the field layout of `uname -a`.
    #[arg(long, env = "RVDESK_UNAME_CHECK")]
    uname_check: bool,

    /// Per-call timeout for tool bridge requests.
    #[arg(long, env = "RVDESK_BRIDGE_TIMEOUT_MS", default_value_t = 5_000)]
    bridge_timeout_ms: u64,

    /// Write the JSON report here instead of stderr.
    #[arg(long, env = "RVDESK_REPORT")]
    report: Option<PathBuf>,

    /// Log filter (tracing-subscriber EnvFilter syntax). `RUST_LOG` takes precedence.
    #[arg(long, env = "RVDESK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Everything one golden-path run needs.
#[derive(Debug, Clone)]
pub struct GoldenPathConfig {
    pub boot: BootMonitorConfig,
    pub capture_timeout: Duration,
    pub capture_poll_interval: Duration,
    pub pace: Pace,
    /// Text typed into the guest, including the terminating newline.
    pub command: String,
    pub validator: OutputValidator,
}

impl Default for GoldenPathConfig {
    fn default() -> Self {
        let required =
            Pattern::parse(DEFAULT_REQUIRED_PATTERN).expect("default required pattern");
        let auxiliary = DEFAULT_AUXILIARY_PATTERNS
            .iter()
            .map(|p| Pattern::parse(p).expect("default auxiliary pattern"))
            .collect();
        Self {
            boot: BootMonitorConfig::default(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            capture_poll_interval: DEFAULT_CAPTURE_POLL_INTERVAL,
            pace: Pace::DEFAULT,
            command: format!("{DEFAULT_COMMAND}\n"),
            validator: OutputValidator::new(required).with_auxiliary(auxiliary),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub golden: GoldenPathConfig,
    pub bridge_timeout: Duration,
    pub report: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let millis = |name: &'static str, ms: u64| {
            if ms == 0 {
                Err(ConfigError::ZeroDuration { name })
            } else {
                Ok(Duration::from_millis(ms))
            }
        };

        let indicators: Vec<String> = if args.indicators.is_empty() {
            DEFAULT_INDICATORS.iter().map(|s| s.to_string()).collect()
        } else {
            args.indicators
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect()
        };
        if indicators.is_empty() {
            return Err(ConfigError::NoIndicators);
        }

        let boot = BootMonitorConfig {
            readiness_timeout: millis("readiness timeout", args.readiness_timeout_ms)?,
            readiness_poll_interval: millis("readiness poll interval", args.readiness_poll_ms)?,
            boot_timeout: millis("boot timeout", args.boot_timeout_ms)?,
            poll_interval: millis("boot poll interval", args.boot_poll_ms)?,
            indicators,
        };

        let auxiliary_src: Vec<String> = if args.auxiliary.is_empty() {
            DEFAULT_AUXILIARY_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            args.auxiliary
        };
        let auxiliary = auxiliary_src
            .iter()
            .map(|s| Pattern::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        let mut validator =
            OutputValidator::new(Pattern::parse(&args.expect)?).with_auxiliary(auxiliary);
        if args.uname_check {
            validator = validator.with_compound(CompoundCheck::uname()?);
        }

        let mut command = args.command;
        if !command.ends_with('\n') {
            command.push('\n');
        }

        let capture_timeout = millis("capture timeout", args.capture_timeout_ms)?;

        Ok(Self {
            golden: GoldenPathConfig {
                boot,
                capture_timeout,
                capture_poll_interval: DEFAULT_CAPTURE_POLL_INTERVAL.min(capture_timeout),
                pace: Pace {
                    press_ms: args.press_ms,
                    release_ms: args.release_ms,
                },
                command,
                validator,
            },
            bridge_timeout: millis("bridge timeout", args.bridge_timeout_ms)?,
            report: args.report,
            log_level: args.log_level,
        })
    }
}
