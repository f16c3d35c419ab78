/// One-shot supervisor timer.
///
/// Mirrors SBI `set_timer` semantics: arming replaces any previous deadline (the discarded deadline
/// never fires), and an expired timer auto-clears so the guest must re-arm it from its interrupt
/// handler. Deadlines are compared as exact `u64` tick values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    armed: bool,
    deadline: u64,
}

impl TimerState {
    pub const fn new() -> Self {
        Self {
            armed: false,
            deadline: 0,
        }
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Last programmed deadline. Only meaningful while [`TimerState::armed`] is true.
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    pub fn arm(&mut self, deadline: u64) {
        self.armed = true;
        self.deadline = deadline;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Returns `true` exactly once per arming, on the first call with `now >= deadline`.
    pub fn poll(&mut self, now: u64) -> bool {
        if !self.armed || now < self.deadline {
            return false;
        }
        self.armed = false;
        true
    }
}
