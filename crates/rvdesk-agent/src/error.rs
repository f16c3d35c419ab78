use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelClass;

/// Failure of the remote tool bridge transport itself (as opposed to an error reported by the
/// tool).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("tool bridge is closed")]
    Closed,

    #[error("tool `{tool}` did not respond within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("unknown correlation id {0}")]
    UnknownRequest(u64),

    #[error("malformed bridge message: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// No channel in the class passed its probe.
    #[error("no {class} channel available")]
    Unavailable { class: ChannelClass },

    #[error("channel `{channel}` failed: {message}")]
    Invoke {
        channel: &'static str,
        message: String,
    },

    #[error("channel `{channel}` does not support {op}")]
    Unsupported {
        channel: &'static str,
        op: &'static str,
    },

    #[error("channel `{channel}` bridge error: {source}")]
    Bridge {
        channel: &'static str,
        #[source]
        source: BridgeError,
    },
}

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("no delivery channel available")]
    ChannelUnavailable,

    /// Another injection is in flight and the caller asked not to wait.
    #[error("another injection is in flight")]
    Busy,

    /// Delivery stopped part-way through. Already-delivered characters are not replayed.
    #[error("delivered {delivered} of {total} characters via `{channel}` before failure: {source}")]
    PartialDelivery {
        delivered: usize,
        total: usize,
        channel: &'static str,
        #[source]
        source: ChannelError,
    },
}

#[derive(Debug, Clone, Error)]
pub enum BootError {
    #[error("hypervisor not ready after {waited:?}")]
    HypervisorUnavailable { waited: Duration },

    #[error("no shell prompt after {waited:?} ({} bytes of console output)", last_output.len())]
    BootTimeout { waited: Duration, last_output: String },

    #[error("boot monitor cancelled")]
    Cancelled,
}

impl BootError {
    pub fn last_output(&self) -> Option<&str> {
        match self {
            BootError::BootTimeout { last_output, .. } => Some(last_output),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no output captured")]
    NoOutputCaptured,
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern `{pattern}`: {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unsupported flag `{flag}` in pattern `{pattern}`")]
    UnsupportedFlag { pattern: String, flag: char },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    #[error("at least one shell-prompt indicator is required")]
    NoIndicators,
}

/// Why a golden-path step stopped the run.
#[derive(Debug, Error)]
pub enum GoldenPathError {
    #[error(transparent)]
    Boot(#[from] BootError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("output does not match required pattern `{required}`")]
    OutputMismatch { required: String },

    #[error("golden path cancelled")]
    Cancelled,
}
