use tracing::{debug, warn};

use crate::aggregate::{self, ANOMALY_INFO_BAD_STATE, ANOMALY_INFO_RTC};
use crate::beacon;
use crate::drivers::{Bus, LinkMode};
use crate::sequence;
use crate::state::{MainState, StatMonState, SECONDS_PER_DAY, TIMER_OFF};
use crate::store::StateStore;
use crate::tick::{TickCoordinator, TimerAction, ALL_QUIET_TIME, BEACON_ON_TIME};

/// Moves the status-monitoring machine to `new`, remembering where it was.
pub fn change_stat_mon_state(store: &mut StateStore, new: StatMonState) {
    change_stat_mon_raw(store, new as u8);
}

fn change_stat_mon_raw(store: &mut StateStore, new: u8) {
    store.update(|s| {
        s.ops.stat_mon_prev_state = s.ops.stat_mon_state;
        s.ops.stat_mon_state = new;
    });
}

/// Returns from the PENDING_PROCESS detour to the interrupted sub-state.
pub fn revert_stat_mon_state(store: &mut StateStore) {
    let previous = store.state().ops.stat_mon_prev_state;
    change_stat_mon_raw(store, previous);
}

/// Raises the main anomaly state, preserving the state it came from.
pub fn raise_anomaly(store: &mut StateStore) {
    warn!("raising anomaly state");
    store.update(|s| {
        s.ops.previous_state = s.ops.main_state;
        s.ops.main_state = MainState::Anomaly as u8;
    });
}

/// Applies a fired status-monitoring timeout: the timed transitions between
/// quiet, beacon, and diagnostic periods.
pub fn apply_timer_action(store: &mut StateStore, action: TimerAction) {
    match action {
        TimerAction::EnterBeaconOn => change_stat_mon_state(store, StatMonState::BeaconOn),
        TimerAction::EnterDiagnosticCheck => {
            change_stat_mon_state(store, StatMonState::DiagnosticCheck);
        }
    }
    store.update(|s| s.ops.timer_mode = TIMER_OFF);
}

/// One pass of the status-monitoring state machine: the controller's
/// default mode, cycling diagnostic -> quiet -> beacon while interleaving
/// the per-tick pending-sequence step.
pub fn dispatch<B: Bus>(store: &mut StateStore, bus: &mut B, ticker: &mut TickCoordinator) {
    bus.set_power_saving(false);
    match StatMonState::from_raw(store.state().ops.stat_mon_state) {
        Some(StatMonState::DiagnosticCheck) => diagnostic_check(store, bus),
        Some(StatMonState::AllQuiet) => {
            if store.state().ops.timer_mode == TIMER_OFF {
                debug!("all quiet, beacon down");
                bus.beacon_power(false);
                ticker.arm(store, ALL_QUIET_TIME, TimerAction::EnterBeaconOn);
            }
        }
        Some(StatMonState::PendingProcess) => sequence::pending_process(store, bus),
        Some(StatMonState::BeaconOn) => beacon_on(store, bus, ticker),
        None => {
            warn!(
                raw = store.state().ops.stat_mon_state,
                "invalid status-monitoring state"
            );
            aggregate::store_anomaly(store, ANOMALY_INFO_BAD_STATE, 0);
            raise_anomaly(store);
        }
    }
}

/// Runs the diagnostic pass at most once per day-of-epoch. Failure is the
/// one transition out of status monitoring the core itself raises.
fn diagnostic_check<B: Bus>(store: &mut StateStore, bus: &mut B) {
    let day = match bus.now_epoch() {
        Ok(epoch) => (epoch / SECONDS_PER_DAY) as u16,
        Err(e) => {
            warn!(error = %e, "diagnostic day check skipped, RTC unavailable");
            aggregate::store_anomaly(store, ANOMALY_INFO_RTC, 0);
            change_stat_mon_state(store, StatMonState::AllQuiet);
            return;
        }
    };

    let mut passed = true;
    if day != store.state().ops.diag_day {
        debug!(day, "running daily diagnostic");
        passed = bus.run_diagnostics();
        store.update(|s| s.ops.diag_day = day);
    }

    if passed {
        change_stat_mon_state(store, StatMonState::AllQuiet);
    } else {
        raise_anomaly(store);
    }
}

/// Powers and refreshes the beacon, then holds the state long enough for
/// the transmission to finish. The radio and beacon share the antenna, so
/// transmission is suppressed while the link is active.
fn beacon_on<B: Bus>(store: &mut StateStore, bus: &mut B, ticker: &mut TickCoordinator) {
    if store.state().ops.timer_mode != TIMER_OFF {
        return;
    }
    if store.state().beacon.enabled != 0 {
        bus.beacon_power(true);
        beacon::update_telemetry(store);
        if bus.link_mode() == LinkMode::Active {
            debug!("link active, beacon transmission suppressed");
        } else {
            let message = beacon::message_text(store.state());
            if let Err(e) = bus.transmit_beacon(&message) {
                warn!(error = %e, "beacon transmission failed");
            }
        }
    }
    ticker.arm(store, BEACON_ON_TIME, TimerAction::EnterDiagnosticCheck);
}
