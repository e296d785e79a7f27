use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::beacon::{self, BeaconIndex};
use crate::drivers::{Bus, RadioConfig};
use crate::monitor;
use crate::response::RespEntry;
use crate::state::{StatMonState, SystemState};
use crate::store::StateStore;
use crate::tick::with_uninterruptible;
use crate::{aggregate, aggregate::ANOMALY_INFO_RTC};

pub const SEQUENCE_CAPACITY: usize = 16;

/// Reserved condition sensor ids: relative time compares `now - lastCmdTime`,
/// absolute time compares `now`.
pub const RELATIVE_TIME_SENSOR: u8 = 254;
pub const ABSOLUTE_TIME_SENSOR: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Comparator {
    Less = 0,
    LessEq = 1,
    Equal = 2,
    GreaterEq = 3,
    Greater = 4,
}

impl Comparator {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Less),
            1 => Some(Self::LessEq),
            2 => Some(Self::Equal),
            3 => Some(Self::GreaterEq),
            4 => Some(Self::Greater),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CondOp {
    Just = 0,
    And = 1,
    Or = 2,
}

impl CondOp {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Just),
            1 => Some(Self::And),
            2 => Some(Self::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    StartSequence = 1,
    LoadRadioConfig = 2,
    ReloadRadioConfig = 3,
    SetSwitch = 4,
    ProcessorMode = 5,
    CheckSdCard = 6,
    ReformatSd = 7,
    EndSequence = 8,
}

impl Opcode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::StartSequence),
            2 => Some(Self::LoadRadioConfig),
            3 => Some(Self::ReloadRadioConfig),
            4 => Some(Self::SetSwitch),
            5 => Some(Self::ProcessorMode),
            6 => Some(Self::CheckSdCard),
            7 => Some(Self::ReformatSd),
            8 => Some(Self::EndSequence),
            _ => None,
        }
    }
}

/// A single comparison against a live sensor value or one of the two
/// reserved time pseudo-sensors.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Condition {
    pub value: u32,
    pub sensor_id: u8,
    pub comparator: u8,
    pub reserved: [u8; 2],
}

impl Condition {
    pub fn new(sensor_id: u8, comparator: Comparator, value: u32) -> Self {
        Self {
            value,
            sensor_id,
            comparator: comparator as u8,
            reserved: [0; 2],
        }
    }

    fn holds_for(&self, current: u32) -> bool {
        let Some(comparator) = Comparator::from_raw(self.comparator) else {
            warn!(raw = self.comparator, "unknown comparator in condition");
            return false;
        };
        match comparator {
            Comparator::Less => current < self.value,
            Comparator::LessEq => current <= self.value,
            Comparator::Equal => current == self.value,
            Comparator::GreaterEq => current >= self.value,
            Comparator::Greater => current > self.value,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CompoundCondition {
    pub left: Condition,
    pub right: Condition,
    pub op: u8,
    pub reserved: [u8; 3],
}

impl CompoundCondition {
    pub fn just(left: Condition) -> Self {
        Self {
            left,
            right: Condition::zeroed(),
            op: CondOp::Just as u8,
            reserved: [0; 3],
        }
    }

    pub fn and(left: Condition, right: Condition) -> Self {
        Self {
            left,
            right,
            op: CondOp::And as u8,
            reserved: [0; 3],
        }
    }

    pub fn or(left: Condition, right: Condition) -> Self {
        Self {
            left,
            right,
            op: CondOp::Or as u8,
            reserved: [0; 3],
        }
    }

    /// Whether either active side compares against relative time.
    pub fn references_relative_time(&self) -> bool {
        self.left.sensor_id == RELATIVE_TIME_SENSOR
            || (self.op != CondOp::Just as u8 && self.right.sensor_id == RELATIVE_TIME_SENSOR)
    }
}

/// Opcode parameters, two raw words interpreted per opcode (switch id and
/// configuration, processor mode).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CommandParams {
    pub word0: u16,
    pub word1: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SeqCommand {
    pub wait: CompoundCondition,
    pub cmd_id: u16,
    pub opcode: u8,
    pub reserved: u8,
    pub params: CommandParams,
}

impl SeqCommand {
    pub fn new(cmd_id: u16, opcode: Opcode, wait: CompoundCondition) -> Self {
        Self {
            wait,
            cmd_id,
            opcode: opcode as u8,
            reserved: 0,
            params: CommandParams::zeroed(),
        }
    }

    pub fn with_params(mut self, word0: u16, word1: u16) -> Self {
        self.params = CommandParams { word0, word1 };
        self
    }
}

/// FIFO of uploaded sequence commands, same double-modulus indexing as the
/// telemetry buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CommandQueue {
    commands: [SeqCommand; SEQUENCE_CAPACITY],
    head: u16,
    tail: u16,
}

const WRAP: u16 = (2 * SEQUENCE_CAPACITY) as u16;

impl CommandQueue {
    pub fn count(&self) -> usize {
        usize::from((self.head + WRAP - self.tail) % WRAP)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn put(&mut self, command: &SeqCommand) -> bool {
        if self.count() == SEQUENCE_CAPACITY {
            return false;
        }
        self.commands[usize::from(self.head) % SEQUENCE_CAPACITY] = *command;
        self.head = (self.head + 1) % WRAP;
        true
    }

    pub fn get(&mut self) -> Option<SeqCommand> {
        if self.is_empty() {
            return None;
        }
        let command = self.commands[usize::from(self.tail) % SEQUENCE_CAPACITY];
        self.tail = (self.tail + 1) % WRAP;
        Some(command)
    }

    pub fn peek(&self) -> Option<&SeqCommand> {
        if self.is_empty() {
            return None;
        }
        Some(&self.commands[usize::from(self.tail) % SEQUENCE_CAPACITY])
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

/// The uploaded sequence: command queue, exit condition, the radio
/// configuration payload, and the relative-time reference point.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Sequence {
    pub queue: CommandQueue,
    pub exit: CompoundCondition,
    pub configs: RadioConfig,
    pub last_cmd_time: u32,
    pub seq_ready: u8,
    pub reserved: [u8; 3],
}

fn sensor_value(state: &SystemState, now: u32, condition: &Condition) -> u32 {
    match condition.sensor_id {
        RELATIVE_TIME_SENSOR => now.wrapping_sub(state.sequence.last_cmd_time),
        ABSOLUTE_TIME_SENSOR => now,
        id => state
            .last_telemetry
            .get(usize::from(id))
            .copied()
            .map_or(0, u32::from),
    }
}

fn check_cond(state: &SystemState, now: u32, condition: &Condition) -> bool {
    let current = sensor_value(state, now, condition);
    let holds = condition.holds_for(current);
    trace!(
        sensor = condition.sensor_id,
        current,
        value = condition.value,
        holds,
        "condition checked"
    );
    holds
}

/// Evaluates a compound condition. The status code classifies which side
/// triggered: JUST->1, AND->2, OR left-only->3, right-only->4, both->5;
/// it is meaningful only when the condition holds.
pub(crate) fn eval_compound(
    state: &SystemState,
    now: u32,
    compound: &CompoundCondition,
) -> (bool, u8) {
    let Some(op) = CondOp::from_raw(compound.op) else {
        warn!(raw = compound.op, "unknown condition operator");
        return (false, 0);
    };
    match op {
        CondOp::Just => (check_cond(state, now, &compound.left), 1),
        CondOp::And => (
            check_cond(state, now, &compound.left) && check_cond(state, now, &compound.right),
            2,
        ),
        CondOp::Or => {
            let left = check_cond(state, now, &compound.left);
            let right = check_cond(state, now, &compound.right);
            match (left, right) {
                (true, false) => (true, 3),
                (false, true) => (true, 4),
                (true, true) => (true, 5),
                (false, false) => (false, 0),
            }
        }
    }
}

/// One executor step, entered once per tick from the PENDING_PROCESS
/// sub-state. The whole body runs at uninterruptible priority so no
/// interrupt can observe a half-normalized exit condition, and the
/// sub-state reverts to whatever the machine was doing before.
pub fn pending_process<B: Bus>(store: &mut StateStore, bus: &mut B) {
    with_uninterruptible(bus, |bus| {
        step(store, bus);
        if store.state().ops.stat_mon_state == StatMonState::PendingProcess as u8 {
            monitor::revert_stat_mon_state(store);
        }
    });
}

fn step<B: Bus>(store: &mut StateStore, bus: &mut B) {
    {
        let sequence = &store.state().sequence;
        if sequence.queue.is_empty() || sequence.seq_ready == 0 {
            return;
        }
    }

    let time = match bus.now_epoch() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "sequence step skipped, RTC unavailable");
            aggregate::store_anomaly(store, ANOMALY_INFO_RTC, 0);
            return;
        }
    };

    // Freeze a relative exit window to absolute time at first evaluation;
    // the moment the link closed is not tracked anywhere else.
    let mut exit = store.state().sequence.exit;
    let mut normalized = false;
    if exit.left.sensor_id == RELATIVE_TIME_SENSOR {
        debug!(window = exit.left.value, "normalizing relative exit condition");
        exit.left.value = exit.left.value.wrapping_add(time);
        exit.left.sensor_id = ABSOLUTE_TIME_SENSOR;
        normalized = true;
    }
    if exit.op != CondOp::Just as u8 && exit.right.sensor_id == RELATIVE_TIME_SENSOR {
        exit.right.value = exit.right.value.wrapping_add(time);
        exit.right.sensor_id = ABSOLUTE_TIME_SENSOR;
        normalized = true;
    }
    if normalized {
        store.update(|s| s.sequence.exit = exit);
    }

    // One coherent snapshot for every condition this step evaluates.
    let snapshot = *store.state();
    let Some(pending) = snapshot.sequence.queue.peek().copied() else {
        return;
    };

    let (exit_hit, exit_code) = eval_compound(&snapshot, time, &exit);
    if exit_hit {
        debug!(code = exit_code, "exit condition met, aborting sequence");
        bus.reset_payload();
        store.update(|s| {
            s.sequence.queue.clear();
            s.response_poll.abort(exit_code, time);
        });
        beacon::update_single(store, BeaconIndex::SoftwareState, b'D');
        return;
    }

    let (wait_met, _) = eval_compound(&snapshot, time, &pending.wait);
    if !wait_met {
        trace!("wait conditions not satisfied");
        return;
    }

    let Some(command) = store.update(|s| s.sequence.queue.get()) else {
        return;
    };
    debug!(cmd_id = command.cmd_id, opcode = command.opcode, "dispatching pending command");
    dispatch(store, bus, &command);
    store.update(|s| {
        s.response_poll
            .update_pending(RespEntry::pending_complete(command.cmd_id, time, 0));
    });

    // A follow-up command gated on relative time measures from now.
    if let Some(next) = store.state().sequence.queue.peek() {
        if next.wait.references_relative_time() {
            store.update(|s| s.sequence.last_cmd_time = time);
        }
    }
}

fn dispatch<B: Bus>(store: &mut StateStore, bus: &mut B, command: &SeqCommand) {
    match Opcode::from_raw(command.opcode) {
        Some(Opcode::StartSequence) => debug!("start sequence"),
        Some(Opcode::LoadRadioConfig) => {
            let configs = store.state().sequence.configs;
            if let Err(e) = bus.store_radio_config(&configs) {
                warn!(error = %e, "journal write for radio config failed");
            }
            if let Err(e) = bus.apply_radio_config(&configs) {
                warn!(error = %e, "radio config apply failed");
            }
        }
        Some(Opcode::ReloadRadioConfig) => match bus.journal_radio_config() {
            Ok(configs) => {
                if let Err(e) = bus.apply_radio_config(&configs) {
                    warn!(error = %e, "radio config re-apply failed");
                }
            }
            Err(e) => warn!(error = %e, "journal read for radio config failed"),
        },
        Some(Opcode::SetSwitch) => {
            let (pca_id, config) = (command.params.word0 as u8, command.params.word1 as u8);
            if let Err(e) = bus.set_switch(pca_id, config) {
                warn!(error = %e, pca_id, "switch configuration failed");
            }
        }
        Some(Opcode::ProcessorMode) => bus.set_cpu_mode(command.params.word0 as u8),
        Some(Opcode::CheckSdCard) => {
            if let Err(e) = bus.storage_self_check() {
                warn!(error = %e, "SD card check failed");
            }
        }
        Some(Opcode::ReformatSd) => match bus.storage_reformat() {
            Ok(()) => {
                if let Err(e) = bus.storage_reinit() {
                    warn!(error = %e, "storage re-init after reformat failed");
                }
            }
            Err(e) => warn!(error = %e, "SD reformat failed"),
        },
        Some(Opcode::EndSequence) => {
            debug!("end sequence");
            beacon::update_single(store, BeaconIndex::SoftwareState, b'C');
        }
        None => warn!(opcode = command.opcode, "unknown pending command opcode"),
    }
}
