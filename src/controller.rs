use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregate::{self, EXPORT_BYTES};
use crate::beacon::{self, BeaconIndex, BEACON_LEN};
use crate::drivers::{Bus, RadioConfig};
use crate::monitor;
use crate::response::{
    RespEntry, UserDeleteOutcome, CLEAR_ALL_ID, ENTRY_WIRE_BYTES, RESPONSE_POLL_CAPACITY,
};
use crate::sequence::{CompoundCondition, Opcode, SeqCommand, SEQUENCE_CAPACITY};
use crate::state::{MainState, SystemState};
use crate::store::StateStore;
use crate::telemetry;
use crate::tick::TickCoordinator;

const TICK_PERIOD_MS: u32 = 1000;

pub const RESPONSE_POLL_WIRE_BYTES: usize = RESPONSE_POLL_CAPACITY * ENTRY_WIRE_BYTES;

/// Whether a ground command executed immediately or was stored for
/// conditional execution in the pending sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandClass {
    Immediate,
    Sequence,
}

/// The narrow interface between command parsing and the rest of the core:
/// the parser produces outcomes, the response poll consumes them.
#[derive(Debug, Clone, Copy)]
pub struct CommandOutcome {
    pub cmd_id: u16,
    pub class: CommandClass,
    pub status: u8,
    pub opcode: Option<Opcode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceLoadError {
    #[error("sequence of {0} commands exceeds capacity {}", SEQUENCE_CAPACITY)]
    TooManyCommands(usize),
    #[error("sequence is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ControllerStats {
    pub ticks: u32,
    pub outcomes_recorded: u32,
}

/// The onboard controller: the replicated state store, the hardware bus,
/// and the tick/timer coordinator, advanced by a cooperative main loop.
pub struct Controller<B: Bus> {
    store: StateStore,
    bus: B,
    ticker: TickCoordinator,
    ms_accumulator: u32,
    stats: ControllerStats,
}

impl<B: Bus> Controller<B> {
    pub fn new(bus: B) -> Self {
        Self {
            store: StateStore::new(),
            bus,
            ticker: TickCoordinator::new(),
            ms_accumulator: 0,
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> &SystemState {
        self.store.state()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Mutable store access for fault-injection tests.
    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// One full 1 Hz tick: telemetry acquisition followed by main-loop
    /// passes, so the sequence executor observes this tick's readings.
    pub fn tick(&mut self) {
        telemetry::record_tick(&mut self.store, &mut self.bus);
        self.stats.ticks = self.stats.ticks.wrapping_add(1);
        // The cooperative loop makes many passes per tick: the first pass
        // takes the pending-process detour acquisition flagged, the second
        // advances whatever timed state the machine reverted to.
        self.pass();
        self.pass();
    }

    /// One main-loop pass without acquisition.
    pub fn pass(&mut self) {
        match MainState::from_raw(self.store.state().ops.main_state) {
            Some(MainState::StatusMonitoring) => {
                monitor::dispatch(&mut self.store, &mut self.bus, &mut self.ticker);
            }
            Some(_) => {
                // Reset, startup, safe hold, command response, and anomaly
                // recovery are handled outside the core.
            }
            None => {
                warn!(
                    raw = self.store.state().ops.main_state,
                    "invalid main state"
                );
                monitor::raise_anomaly(&mut self.store);
            }
        }
    }

    /// Drives the controller from wall-clock milliseconds: expires armed
    /// timeouts and runs one tick per elapsed second.
    pub fn advance(&mut self, elapsed_ms: u32) {
        if let Some(action) = self.ticker.advance(elapsed_ms) {
            monitor::apply_timer_action(&mut self.store, action);
        }
        self.ms_accumulator += elapsed_ms;
        while self.ms_accumulator >= TICK_PERIOD_MS {
            self.ms_accumulator -= TICK_PERIOD_MS;
            self.tick();
        }
    }

    /// Records a command receipt in the response poll. Sequence-class
    /// commands enter as PENDING until the executor promotes them; an
    /// END_SEQUENCE upload also pins the relative-time reference.
    pub fn record_command_outcome(&mut self, outcome: CommandOutcome) {
        let epoch = match self.bus.now_epoch() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "command outcome stamped with epoch 0");
                0
            }
        };
        let entry = match outcome.class {
            CommandClass::Immediate => RespEntry::immediate(outcome.cmd_id, epoch, outcome.status),
            CommandClass::Sequence => RespEntry::pending(outcome.cmd_id, epoch),
        };
        self.store.update(|s| {
            if outcome.class == CommandClass::Sequence && outcome.opcode == Some(Opcode::EndSequence)
            {
                s.sequence.last_cmd_time = epoch;
            }
            s.response_poll.enqueue(entry);
        });
        self.stats.outcomes_recorded += 1;
    }

    /// Installs an uploaded sequence: commands, exit condition, and radio
    /// configuration payload. Each command is receipted as PENDING; the
    /// sequence arms only when `ready` is set.
    pub fn load_sequence(
        &mut self,
        commands: &[SeqCommand],
        exit: CompoundCondition,
        configs: RadioConfig,
    ) -> Result<(), SequenceLoadError> {
        if commands.is_empty() {
            return Err(SequenceLoadError::Empty);
        }
        if commands.len() > SEQUENCE_CAPACITY {
            return Err(SequenceLoadError::TooManyCommands(commands.len()));
        }
        debug!(count = commands.len(), "loading pending sequence");
        self.store.update(|s| {
            s.sequence.queue.clear();
            for command in commands {
                s.sequence.queue.put(command);
            }
            s.sequence.exit = exit;
            s.sequence.configs = configs;
            s.sequence.seq_ready = 0;
        });
        for command in commands {
            self.record_command_outcome(CommandOutcome {
                cmd_id: command.cmd_id,
                class: CommandClass::Sequence,
                status: 0,
                opcode: Opcode::from_raw(command.opcode),
            });
        }
        Ok(())
    }

    pub fn set_sequence_ready(&mut self, ready: bool) {
        self.store
            .update(|s| s.sequence.seq_ready = u8::from(ready));
    }

    /// Response-poll-clear command: the reserved id wipes the whole poll,
    /// anything else deletes one deletable entry.
    pub fn clear_response_poll(&mut self, cmd_id: u16) -> UserDeleteOutcome {
        if cmd_id == CLEAR_ALL_ID {
            self.store.update(|s| s.response_poll.clear());
            UserDeleteOutcome::Deleted
        } else {
            self.store.update(|s| s.response_poll.user_delete(cmd_id))
        }
    }

    /// The poll packed for downlink; the link layer prefixes the length.
    pub fn response_poll_bytes(&self) -> Vec<u8, RESPONSE_POLL_WIRE_BYTES> {
        let mut wire = [0u8; RESPONSE_POLL_WIRE_BYTES];
        let used = self.store.state().response_poll.serialize(&mut wire);
        Vec::from_slice(&wire[..used]).unwrap_or_default()
    }

    pub fn basic_telemetry_bytes(&self) -> [u8; EXPORT_BYTES] {
        let state = self.store.state();
        state.basic.export(state.ops.main_state)
    }

    /// Clears the running aggregates on ground request.
    pub fn reset_basic_telemetry(&mut self) -> bool {
        aggregate::reset(&mut self.store)
    }

    pub fn beacon_text(&self) -> ArrayString<BEACON_LEN> {
        beacon::message_text(self.store.state())
    }

    /// Enables or disables the beacon; true when the stored flag matches
    /// the request afterwards.
    pub fn set_beacon_enabled(&mut self, enabled: bool) -> bool {
        self.store
            .update(|s| s.beacon.enabled = u8::from(enabled));
        (self.store.state().beacon.enabled != 0) == enabled
    }

    pub fn set_beacon_char(&mut self, index: BeaconIndex, value: u8) {
        beacon::update_single(&mut self.store, index, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SimBus;
    use crate::sequence::{Comparator, Condition};

    fn wait_immediately() -> CompoundCondition {
        CompoundCondition::just(Condition::new(0, Comparator::GreaterEq, 0))
    }

    #[test]
    fn test_load_sequence_bounds() {
        let mut controller = Controller::new(SimBus::new());
        assert_eq!(
            controller.load_sequence(
                &[],
                CompoundCondition::just(Condition::new(0, Comparator::Greater, 1)),
                RadioConfig::default_flight()
            ),
            Err(SequenceLoadError::Empty)
        );

        let too_many: std::vec::Vec<SeqCommand> = (0..SEQUENCE_CAPACITY as u16 + 1)
            .map(|id| SeqCommand::new(id, Opcode::StartSequence, wait_immediately()))
            .collect();
        assert!(matches!(
            controller.load_sequence(
                &too_many,
                CompoundCondition::just(Condition::new(0, Comparator::Greater, 1)),
                RadioConfig::default_flight()
            ),
            Err(SequenceLoadError::TooManyCommands(_))
        ));
    }

    #[test]
    fn test_outcome_recording() {
        let mut controller = Controller::new(SimBus::new());
        controller.bus_mut().set_epoch(500);

        controller.record_command_outcome(CommandOutcome {
            cmd_id: 9,
            class: CommandClass::Immediate,
            status: 3,
            opcode: None,
        });
        controller.record_command_outcome(CommandOutcome {
            cmd_id: 10,
            class: CommandClass::Sequence,
            status: 0,
            opcode: Some(Opcode::EndSequence),
        });

        let poll = &controller.state().response_poll;
        assert_eq!(poll.len(), 2);
        assert!(poll.entries()[0].is_immediate());
        assert_eq!(poll.entries()[0].status, 3);
        assert!(poll.entries()[1].is_pending());
        assert_eq!(poll.entries()[1].status, crate::response::PENDING_STATUS);
        // END_SEQUENCE pinned the relative-time reference.
        assert_eq!(controller.state().sequence.last_cmd_time, 500);
    }

    #[test]
    fn test_clear_response_poll() {
        let mut controller = Controller::new(SimBus::new());
        controller.record_command_outcome(CommandOutcome {
            cmd_id: 1,
            class: CommandClass::Immediate,
            status: 0,
            opcode: None,
        });
        controller.record_command_outcome(CommandOutcome {
            cmd_id: 2,
            class: CommandClass::Sequence,
            status: 0,
            opcode: None,
        });

        assert_eq!(
            controller.clear_response_poll(2),
            UserDeleteOutcome::IsPending
        );
        assert_eq!(
            controller.clear_response_poll(1),
            UserDeleteOutcome::Deleted
        );
        assert_eq!(
            controller.clear_response_poll(CLEAR_ALL_ID),
            UserDeleteOutcome::Deleted
        );
        assert!(controller.state().response_poll.is_empty());
    }
}
