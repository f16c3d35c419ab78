//! Guest-facing Supervisor Binary Interface (SBI) timer and console controller.
//!
//! The emulation loop owns the virtual clock. On every evaluation step it calls
//! [`TimerConsoleController::check_interrupt`] with the current tick value and, whenever the guest
//! traps with `ecall`, forwards `(a7, a6, a0..a5)` to [`TimerConsoleController::handle`]. Nothing in
//! this crate performs I/O or reads a host clock: all state transitions are driven by the caller,
//! which keeps guest-visible timer behaviour deterministic and easy to test.
//!
//! Host-side consumers (boot monitors, agents) read console output via
//! [`TimerConsoleController::snapshot_output`] through a [`SharedController`] handle.

#![forbid(unsafe_code)]

mod console;
mod controller;
mod sbi;
mod timer;

pub use console::{ConsoleBuffer, InputQueue};
pub use controller::{shared, ResetRequest, SharedController, TimerConsoleController};
pub use sbi::{ext, SbiError, SbiRet, SBI_IMPL_ID, SBI_IMPL_VERSION, SBI_SPEC_VERSION};
pub use timer::TimerState;
