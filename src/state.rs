use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::aggregate::BasicTelemetry;
use crate::beacon::BeaconState;
use crate::buffer::LinearBuf;
use crate::response::ResponsePoll;
use crate::sequence::Sequence;

pub const NUM_SENSORS: usize = 44;
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Single-shot timeout slot codes (`OpsState::timer_mode`).
pub const TIMER_OFF: u8 = 0;
pub const TIMER_STATUS_MONITOR: u8 = 1;

/// Sentinel meaning "no diagnostic has run yet" so the day-0 check still fires.
pub const DIAG_DAY_NONE: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MainState {
    Reset = 1,
    Startup = 2,
    SafeHold = 3,
    CommandResponse = 4,
    StatusMonitoring = 5,
    Anomaly = 6,
}

impl MainState {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Reset),
            2 => Some(Self::Startup),
            3 => Some(Self::SafeHold),
            4 => Some(Self::CommandResponse),
            5 => Some(Self::StatusMonitoring),
            6 => Some(Self::Anomaly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatMonState {
    DiagnosticCheck = 1,
    AllQuiet = 2,
    BeaconOn = 3,
    PendingProcess = 4,
}

impl StatMonState {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::DiagnosticCheck),
            2 => Some(Self::AllQuiet),
            3 => Some(Self::BeaconOn),
            4 => Some(Self::PendingProcess),
            _ => None,
        }
    }
}

/// Operational state codes. Stored raw so the whole section stays a plain
/// byte image for replication; decode with `MainState::from_raw` and
/// `StatMonState::from_raw` at the point of use.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct OpsState {
    pub main_state: u8,
    pub previous_state: u8,
    pub stat_mon_state: u8,
    pub stat_mon_prev_state: u8,
    pub timer_mode: u8,
    pub reserved: u8,
    pub diag_day: u16,
}

/// The entire mutable state of the controller. Three copies of this struct
/// live inside the state store; every field is reachable only through the
/// store's voted write path.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SystemState {
    pub telemetry: LinearBuf,
    pub basic: BasicTelemetry,
    pub last_telemetry: [u16; NUM_SENSORS],
    pub sequence: Sequence,
    pub response_poll: ResponsePoll,
    pub ops: OpsState,
    pub beacon: BeaconState,
}

impl SystemState {
    /// State image at the end of startup, entering status monitoring.
    pub fn startup() -> Self {
        let mut state = Self::zeroed();
        state.ops.main_state = MainState::StatusMonitoring as u8;
        state.ops.previous_state = MainState::Startup as u8;
        state.ops.stat_mon_state = StatMonState::DiagnosticCheck as u8;
        state.ops.stat_mon_prev_state = StatMonState::DiagnosticCheck as u8;
        state.ops.timer_mode = TIMER_OFF;
        state.ops.diag_day = DIAG_DAY_NONE;
        state.beacon = BeaconState::nominal();
        state
    }
}

// The voting pass walks the replicas as one word-aligned byte image.
const_assert_eq!(core::mem::size_of::<SystemState>() % 4, 0);
const_assert_eq!(core::mem::size_of::<OpsState>(), 8);
