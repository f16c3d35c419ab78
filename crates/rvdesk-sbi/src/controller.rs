use std::sync::{Arc, Mutex};

use crate::console::{ConsoleBuffer, InputQueue};
use crate::sbi::{ext, SbiError, SbiRet, SBI_IMPL_ID, SBI_IMPL_VERSION, SBI_SPEC_VERSION};
use crate::timer::TimerState;

/// Handle shared between the emulation loop (sole writer) and host-side readers.
///
/// Readers should hold the lock only long enough to copy a snapshot out.
pub type SharedController = Arc<Mutex<TimerConsoleController>>;

pub fn shared(controller: TimerConsoleController) -> SharedController {
    Arc::new(Mutex::new(controller))
}

/// A system reset/shutdown requested by the guest via SRST or the legacy shutdown call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    /// 0 = shutdown, 1 = cold reboot, 2 = warm reboot, `0xF000_0000..` vendor specific.
    pub reset_type: u32,
    /// 0 = no reason, 1 = system failure.
    pub reason: u32,
}

const HSM_HART_STARTED: i64 = 0;

/// SBI timer/console handler for a single-hart guest.
#[derive(Debug, Default)]
pub struct TimerConsoleController {
    timer: TimerState,
    output: ConsoleBuffer,
    input: InputQueue,
    reset_request: Option<ResetRequest>,
}

impl TimerConsoleController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the one-shot timer, discarding any earlier deadline without firing it.
    pub fn set_timer(&mut self, deadline: u64) -> SbiRet {
        self.timer.arm(deadline);
        SbiRet::success(0)
    }

    /// Evaluates the timer against the current virtual clock.
    ///
    /// Returns `true` exactly once per arming (auto-clear); repeated calls at or after expiry
    /// return `false` until the guest arms the timer again.
    pub fn check_interrupt(&mut self, now: u64) -> bool {
        let fired = self.timer.poll(now);
        if fired {
            tracing::trace!(now, "supervisor timer fired");
        }
        fired
    }

    pub fn timer(&self) -> TimerState {
        self.timer
    }

    pub fn push_output(&mut self, byte: u8) {
        self.output.push(byte);
    }

    pub fn queue_input(&mut self, byte: u8) {
        self.input.push(byte);
    }

    /// Emulation-side consumer of the input FIFO.
    pub fn take_input(&mut self) -> Option<u8> {
        self.input.pop()
    }

    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    pub fn snapshot_output(&self) -> String {
        self.output.snapshot()
    }

    pub fn output(&self) -> &ConsoleBuffer {
        &self.output
    }

    pub fn reset_request(&self) -> Option<ResetRequest> {
        self.reset_request
    }

    pub fn take_reset_request(&mut self) -> Option<ResetRequest> {
        self.reset_request.take()
    }

    /// Session teardown: disarms the timer and truncates both buffers.
    pub fn reset(&mut self) {
        self.timer.disarm();
        self.output.clear();
        self.input.clear();
        self.reset_request = None;
    }

    /// Dispatches an `ecall` from supervisor mode.
    ///
    /// `extension` is `a7`, `function` is `a6` and `args` holds `a0..a5`; missing trailing
    /// arguments read as zero.
    pub fn handle(&mut self, extension: u64, function: u64, args: &[u64]) -> SbiRet {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);

        match extension {
            ext::LEGACY_SET_TIMER => self.set_timer(legacy_deadline(arg(0), arg(1))),
            // Legacy calls return their value in `a0`.
            ext::LEGACY_CONSOLE_PUTCHAR => {
                self.push_output(arg(0) as u8);
                SbiRet::success(0)
            }
            ext::LEGACY_CONSOLE_GETCHAR => SbiRet {
                error: self.take_input().map_or(-1, i64::from),
                value: 0,
            },
            ext::LEGACY_SHUTDOWN => {
                self.request_reset(0, 0);
                SbiRet::success(0)
            }
            ext::BASE => self.handle_base(function, arg(0)),
            ext::TIME => match function {
                0 => self.set_timer(arg(0)),
                _ => SbiRet::err(SbiError::NotSupported),
            },
            ext::SRST => match function {
                0 => self.handle_system_reset(arg(0), arg(1)),
                _ => SbiRet::err(SbiError::NotSupported),
            },
            ext::HSM => handle_hsm(function, arg(0)),
            _ => {
                tracing::warn!("unsupported SBI call: ext=0x{extension:x} fid={function}");
                SbiRet::err(SbiError::NotSupported)
            }
        }
    }

    fn handle_base(&self, function: u64, probe_ext: u64) -> SbiRet {
        match function {
            0 => SbiRet::success(SBI_SPEC_VERSION),
            1 => SbiRet::success(SBI_IMPL_ID),
            2 => SbiRet::success(SBI_IMPL_VERSION),
            3 => SbiRet::success(i64::from(is_supported_extension(probe_ext))),
            // mvendorid / marchid / mimpid
            4..=6 => SbiRet::success(0),
            _ => SbiRet::err(SbiError::NotSupported),
        }
    }

    fn handle_system_reset(&mut self, reset_type: u64, reason: u64) -> SbiRet {
        let (Ok(reset_type), Ok(reason)) = (u32::try_from(reset_type), u32::try_from(reason))
        else {
            return SbiRet::err(SbiError::InvalidParam);
        };
        let type_ok = reset_type <= 2 || reset_type >= 0xF000_0000;
        let reason_ok = reason <= 1 || reason >= 0xE000_0000;
        if !type_ok || !reason_ok {
            return SbiRet::err(SbiError::InvalidParam);
        }
        self.request_reset(reset_type, reason);
        SbiRet::success(0)
    }

    fn request_reset(&mut self, reset_type: u32, reason: u32) {
        tracing::info!(reset_type, reason, "guest requested system reset");
        self.reset_request = Some(ResetRequest { reset_type, reason });
    }
}

/// RV32 guests pass the deadline split across `a0` (low) and `a1` (high). RV64 guests pass the full
/// value in `a0` and leave `a1` zero.
fn legacy_deadline(time_low: u64, time_high: u64) -> u64 {
    if time_high == 0 {
        return time_low;
    }
    (time_high << 32) | (time_low & 0xFFFF_FFFF)
}

fn is_supported_extension(extension: u64) -> bool {
    matches!(
        extension,
        ext::LEGACY_SET_TIMER
            | ext::LEGACY_CONSOLE_PUTCHAR
            | ext::LEGACY_CONSOLE_GETCHAR
            | ext::LEGACY_SHUTDOWN
            | ext::BASE
            | ext::TIME
            | ext::SRST
            | ext::HSM
    )
}

// Single hart: hart 0 is always running.
fn handle_hsm(function: u64, hart_id: u64) -> SbiRet {
    match function {
        // hart_start
        0 if hart_id == 0 => SbiRet::err(SbiError::AlreadyAvailable),
        // hart_get_status
        2 if hart_id == 0 => SbiRet::success(HSM_HART_STARTED),
        0 | 2 => SbiRet::err(SbiError::InvalidParam),
        // hart_stop / hart_suspend
        1 | 3 => SbiRet::err(SbiError::Failed),
        _ => SbiRet::err(SbiError::NotSupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_set_timer_combines_halves() {
        let mut ctl = TimerConsoleController::new();
        let ret = ctl.handle(ext::LEGACY_SET_TIMER, 0, &[0x8000_0000, 0x1]);
        assert_eq!(ret.to_array(), [0, 0]);
        assert!(ctl.timer().armed());
        assert_eq!(ctl.timer().deadline(), 0x1_8000_0000);
    }

    #[test]
    fn legacy_set_timer_keeps_full_low_word_on_rv64() {
        let mut ctl = TimerConsoleController::new();
        ctl.handle(ext::LEGACY_SET_TIMER, 0, &[0x0000_0002_0000_0000, 0]);
        assert_eq!(ctl.timer().deadline(), 0x0000_0002_0000_0000);
    }

    #[test]
    fn time_extension_arms_timer() {
        let mut ctl = TimerConsoleController::new();
        let ret = ctl.handle(ext::TIME, 0, &[1_000_000]);
        assert!(ret.is_success());
        assert!(!ctl.check_interrupt(999_999));
        assert!(ctl.check_interrupt(1_000_000));
        assert_eq!(ctl.handle(ext::TIME, 1, &[]), SbiRet::err(SbiError::NotSupported));
    }

    #[test]
    fn legacy_console_round_trip() {
        let mut ctl = TimerConsoleController::new();
        for byte in b"ok\n" {
            ctl.handle(ext::LEGACY_CONSOLE_PUTCHAR, 0, &[u64::from(*byte)]);
        }
        assert_eq!(ctl.snapshot_output(), "ok\n");

        assert_eq!(ctl.handle(ext::LEGACY_CONSOLE_GETCHAR, 0, &[]).error, -1);
        ctl.queue_input(b'x');
        assert_eq!(
            ctl.handle(ext::LEGACY_CONSOLE_GETCHAR, 0, &[]).error,
            i64::from(b'x')
        );
        assert_eq!(ctl.pending_input(), 0);
    }

    #[test]
    fn base_extension_reports_version_and_probes() {
        let mut ctl = TimerConsoleController::new();
        assert_eq!(ctl.handle(ext::BASE, 0, &[]).value, SBI_SPEC_VERSION);
        assert_eq!(ctl.handle(ext::BASE, 1, &[]).value, SBI_IMPL_ID);
        assert_eq!(ctl.handle(ext::BASE, 2, &[]).value, SBI_IMPL_VERSION);
        assert_eq!(ctl.handle(ext::BASE, 3, &[ext::TIME]).value, 1);
        assert_eq!(ctl.handle(ext::BASE, 3, &[ext::IPI]).value, 0);
        assert_eq!(ctl.handle(ext::BASE, 3, &[ext::RFENCE]).value, 0);
        assert_eq!(
            ctl.handle(ext::BASE, 99, &[]),
            SbiRet::err(SbiError::NotSupported)
        );
    }

    #[test]
    fn system_reset_is_recorded_and_validated() {
        let mut ctl = TimerConsoleController::new();
        assert_eq!(
            ctl.handle(ext::SRST, 0, &[7, 0]),
            SbiRet::err(SbiError::InvalidParam)
        );
        assert_eq!(ctl.reset_request(), None);

        assert!(ctl.handle(ext::SRST, 0, &[1, 0]).is_success());
        assert_eq!(
            ctl.take_reset_request(),
            Some(ResetRequest {
                reset_type: 1,
                reason: 0
            })
        );

        ctl.handle(ext::LEGACY_SHUTDOWN, 0, &[]);
        assert_eq!(ctl.reset_request().map(|r| r.reset_type), Some(0));
    }

    #[test]
    fn hsm_reports_single_started_hart() {
        let mut ctl = TimerConsoleController::new();
        assert_eq!(ctl.handle(ext::HSM, 2, &[0]), SbiRet::success(HSM_HART_STARTED));
        assert_eq!(
            ctl.handle(ext::HSM, 2, &[1]),
            SbiRet::err(SbiError::InvalidParam)
        );
        assert_eq!(
            ctl.handle(ext::HSM, 0, &[0]),
            SbiRet::err(SbiError::AlreadyAvailable)
        );
    }

    #[test]
    fn unsupported_extensions_are_rejected() {
        let mut ctl = TimerConsoleController::new();
        assert_eq!(
            ctl.handle(ext::IPI, 0, &[]),
            SbiRet::err(SbiError::NotSupported)
        );
        assert_eq!(
            ctl.handle(0xDEAD, 0, &[]),
            SbiRet::err(SbiError::NotSupported)
        );
    }

    #[test]
    fn reset_clears_session_state() {
        let mut ctl = TimerConsoleController::new();
        ctl.set_timer(5);
        ctl.push_output(b'#');
        ctl.queue_input(b'a');
        ctl.reset();
        assert!(!ctl.timer().armed());
        assert!(ctl.snapshot_output().is_empty());
        assert_eq!(ctl.take_input(), None);
    }
}
