use tracing::trace;

use crate::drivers::{Bus, CpuPriority};
use crate::state::{TIMER_OFF, TIMER_STATUS_MONITOR};
use crate::store::StateStore;

/// Quiet period before the beacon powers up, in coordinator ticks.
pub const ALL_QUIET_TIME: u32 = 140_000;
/// Beacon transmission window, in coordinator ticks.
pub const BEACON_ON_TIME: u32 = 40_000;

/// What an expired status-monitoring timeout asks the state machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    EnterBeaconOn,
    EnterDiagnosticCheck,
}

/// Single-shot timeout registry driving the timed state transitions. One
/// slot: arming a new timeout implicitly cancels the previous one.
#[derive(Debug, Default)]
pub struct TickCoordinator {
    timeout: Option<(u32, TimerAction)>,
}

impl TickCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the status-monitoring timeout and records the armed mode in
    /// replicated state.
    pub fn arm(&mut self, store: &mut StateStore, ticks: u32, action: TimerAction) {
        trace!(ticks, ?action, "arming timeout");
        self.timeout = Some((ticks, action));
        store.update(|s| s.ops.timer_mode = TIMER_STATUS_MONITOR);
    }

    pub fn disarm(&mut self, store: &mut StateStore) {
        self.timeout = None;
        store.update(|s| s.ops.timer_mode = TIMER_OFF);
    }

    pub fn armed(&self) -> bool {
        self.timeout.is_some()
    }

    /// Advances the registry by `elapsed` ticks, returning the action of a
    /// timeout that expired.
    pub fn advance(&mut self, elapsed: u32) -> Option<TimerAction> {
        let (remaining, action) = self.timeout?;
        if elapsed >= remaining {
            self.timeout = None;
            Some(action)
        } else {
            self.timeout = Some((remaining - elapsed, action));
            None
        }
    }
}

/// Runs `body` at uninterruptible CPU priority, restoring the previous
/// priority on the way out.
pub fn with_uninterruptible<B: Bus, R>(bus: &mut B, body: impl FnOnce(&mut B) -> R) -> R {
    let previous = bus.set_cpu_priority(CpuPriority::Uninterruptible);
    let out = body(bus);
    bus.set_cpu_priority(previous);
    out
}
