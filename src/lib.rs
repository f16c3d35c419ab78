//! RISC-V virtual desktop core.
//!
//! - [`sbi`]: guest-facing SBI timer/console controller, driven by the emulation loop.
//! - [`agent`]: host-side channels, boot monitor, input injector, output validator and the
//!   golden-path orchestrator that ties them together.

#![forbid(unsafe_code)]

pub use rvdesk_agent as agent;
pub use rvdesk_sbi as sbi;
