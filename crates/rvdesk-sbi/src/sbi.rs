use thiserror::Error;

/// SBI extension IDs handled by the controller (`a7`).
pub mod ext {
    /// Legacy `sbi_set_timer`. `a0`/`a1` carry the low/high halves of the deadline on RV32.
    pub const LEGACY_SET_TIMER: u64 = 0x00;
    pub const LEGACY_CONSOLE_PUTCHAR: u64 = 0x01;
    pub const LEGACY_CONSOLE_GETCHAR: u64 = 0x02;
    pub const LEGACY_SHUTDOWN: u64 = 0x08;

    pub const BASE: u64 = 0x10;
    /// "TIME"
    pub const TIME: u64 = 0x5449_4D45;
    /// "sPI"
    pub const IPI: u64 = 0x0073_5049;
    /// "RFNC"
    pub const RFENCE: u64 = 0x5246_4E43;
    /// "HSM"
    pub const HSM: u64 = 0x0048_534D;
    /// "SRST"
    pub const SRST: u64 = 0x5352_5354;
}

/// Encoded as `major << 24 | minor`: v0.2 (first revision defining TIME/HSM/SRST).
pub const SBI_SPEC_VERSION: i64 = 0x0000_0002;
/// Implementation IDs 0..=10 belong to registered SBI implementations; this one is unassigned.
pub const SBI_IMPL_ID: i64 = 0x7264;
pub const SBI_IMPL_VERSION: i64 = 1;

/// Standard SBI error codes (returned in `a0`).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SbiError {
    #[error("SBI call failed")]
    Failed,
    #[error("SBI call not supported")]
    NotSupported,
    #[error("invalid SBI parameter")]
    InvalidParam,
    #[error("SBI call denied")]
    Denied,
    #[error("invalid address")]
    InvalidAddress,
    #[error("already available")]
    AlreadyAvailable,
}

impl SbiError {
    pub const fn code(self) -> i64 {
        match self {
            SbiError::Failed => -1,
            SbiError::NotSupported => -2,
            SbiError::InvalidParam => -3,
            SbiError::Denied => -4,
            SbiError::InvalidAddress => -5,
            SbiError::AlreadyAvailable => -6,
        }
    }

    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(SbiError::Failed),
            -2 => Some(SbiError::NotSupported),
            -3 => Some(SbiError::InvalidParam),
            -4 => Some(SbiError::Denied),
            -5 => Some(SbiError::InvalidAddress),
            -6 => Some(SbiError::AlreadyAvailable),
            _ => None,
        }
    }
}

/// `(a0, a1)` pair written back to the guest after an SBI call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SbiRet {
    pub error: i64,
    pub value: i64,
}

impl SbiRet {
    pub const fn success(value: i64) -> Self {
        Self { error: 0, value }
    }

    pub const fn err(err: SbiError) -> Self {
        Self {
            error: err.code(),
            value: 0,
        }
    }

    pub const fn is_success(&self) -> bool {
        self.error == 0
    }

    /// Converts the raw pair into a `Result`, mapping unknown negative codes to
    /// [`SbiError::Failed`].
    pub fn into_result(self) -> Result<i64, SbiError> {
        if self.error == 0 {
            return Ok(self.value);
        }
        Err(SbiError::from_code(self.error).unwrap_or(SbiError::Failed))
    }

    /// The raw register pair, as the hypervisor ABI expects it.
    pub const fn to_array(self) -> [i64; 2] {
        [self.error, self.value]
    }
}
