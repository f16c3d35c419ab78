//! Host-side agent that drives a RISC-V guest through the golden path: wait for the hypervisor,
//! wait for a shell prompt, type a command, and check what the guest printed.
//!
//! Every step talks to the guest through a [`channel::ChannelResolver`], so the same flow works
//! over the remote tool bridge, a direct hypervisor reference, or the SBI controller's own
//! input queue and console buffer.

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod injector;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod validator;

pub use channel::{Channel, ChannelClass, ChannelResolver, HypervisorStatus};
pub use config::{Config, GoldenPathConfig};
pub use error::{
    BootError, BridgeError, ChannelError, ConfigError, GoldenPathError, InjectionError,
    PatternError, ValidationError,
};
pub use injector::{InjectionReport, InputInjector, Pace};
pub use monitor::{BootMonitor, BootMonitorConfig, BootOutcome, BootState, FailureReason};
pub use orchestrator::GoldenPathOrchestrator;
pub use report::{GoldenPathReport, Step, StepResults};
pub use validator::{validate, CompoundCheck, OutputValidator, Pattern, ValidationReport};
