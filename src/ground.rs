use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::beacon::BeaconIndex;
use crate::controller::{CommandClass, CommandOutcome, Controller};
use crate::drivers::{Bus, RadioConfig};
use crate::response::UserDeleteOutcome;
use crate::sequence::{
    Comparator, CompoundCondition, CondOp, Condition, Opcode, SeqCommand,
};

/// Serde-friendly image of a [`Condition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub sensor_id: u8,
    pub comparator: Comparator,
    pub value: u32,
}

impl ConditionSpec {
    fn build(self) -> Condition {
        Condition::new(self.sensor_id, self.comparator, self.value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompoundSpec {
    pub left: ConditionSpec,
    pub op: CondOp,
    pub right: Option<ConditionSpec>,
}

impl CompoundSpec {
    fn build(self) -> CompoundCondition {
        match (self.op, self.right) {
            (CondOp::And, Some(right)) => CompoundCondition::and(self.left.build(), right.build()),
            (CondOp::Or, Some(right)) => CompoundCondition::or(self.left.build(), right.build()),
            _ => CompoundCondition::just(self.left.build()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeqCommandSpec {
    pub cmd_id: u16,
    pub opcode: Opcode,
    pub wait: CompoundSpec,
    #[serde(default)]
    pub params: Option<(u16, u16)>,
}

impl SeqCommandSpec {
    fn build(self) -> SeqCommand {
        let command = SeqCommand::new(self.cmd_id, self.opcode, self.wait.build());
        match self.params {
            Some((word0, word1)) => command.with_params(word0, word1),
            None => command,
        }
    }
}

/// Commands the ground link delivers to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundCommand {
    pub id: u16,
    pub request: GroundRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroundRequest {
    Ping,
    Status,
    SetBeacon {
        enabled: bool,
    },
    SetBeaconChar {
        index: u8,
        value: char,
    },
    FetchResponsePoll,
    ClearResponsePoll {
        cmd_id: u16,
    },
    FetchBasicTelemetry,
    ResetBasicTelemetry,
    LoadSequence {
        exit: CompoundSpec,
        #[serde(default)]
        configs: Option<RadioConfig>,
        commands: Vec<SeqCommandSpec>,
    },
    SetSequenceReady {
        ready: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundResponse {
    pub id: u16,
    pub status: u8,
    pub message: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl GroundResponse {
    fn ok(id: u16) -> Self {
        Self {
            id,
            status: 0,
            message: None,
            payload: None,
        }
    }

    fn failed(id: u16, status: u8, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            message: Some(message.into()),
            payload: None,
        }
    }

    fn with_payload(id: u16, payload: Vec<u8>) -> Self {
        Self {
            id,
            status: 0,
            message: None,
            payload: Some(payload),
        }
    }
}

/// Executes one ground command and receipts it in the response poll, the
/// way the link-layer command parser drives the flight core.
pub fn dispatch<B: Bus>(controller: &mut Controller<B>, command: GroundCommand) -> GroundResponse {
    debug!(id = command.id, "ground command received");
    let mut class = CommandClass::Immediate;
    let response = match command.request {
        GroundRequest::Ping => GroundResponse::ok(command.id),
        GroundRequest::Status => {
            let state = controller.state();
            let summary = format!(
                "main={} statmon={} beacon={} poll={}",
                state.ops.main_state,
                state.ops.stat_mon_state,
                controller.beacon_text(),
                state.response_poll.len(),
            );
            GroundResponse {
                id: command.id,
                status: 0,
                message: Some(summary),
                payload: None,
            }
        }
        GroundRequest::SetBeacon { enabled } => {
            if controller.set_beacon_enabled(enabled) {
                GroundResponse::ok(command.id)
            } else {
                GroundResponse::failed(command.id, 1, "beacon state mismatch")
            }
        }
        GroundRequest::SetBeaconChar { index, value } => match BeaconIndex::from_raw(index) {
            Some(index) => {
                controller.set_beacon_char(index, value as u8);
                GroundResponse::ok(command.id)
            }
            None => GroundResponse::failed(command.id, 1, "beacon index out of range"),
        },
        GroundRequest::FetchResponsePoll => {
            let bytes = controller.response_poll_bytes();
            GroundResponse::with_payload(command.id, bytes.to_vec())
        }
        GroundRequest::ClearResponsePoll { cmd_id } => {
            let outcome = controller.clear_response_poll(cmd_id);
            match outcome {
                UserDeleteOutcome::Deleted => GroundResponse::ok(command.id),
                other => GroundResponse::failed(
                    command.id,
                    other.wire_code(),
                    "response poll entry not deleted",
                ),
            }
        }
        GroundRequest::FetchBasicTelemetry => {
            GroundResponse::with_payload(command.id, controller.basic_telemetry_bytes().to_vec())
        }
        GroundRequest::ResetBasicTelemetry => {
            if controller.reset_basic_telemetry() {
                GroundResponse::ok(command.id)
            } else {
                GroundResponse::failed(command.id, 1, "aggregate clear verification failed")
            }
        }
        GroundRequest::LoadSequence {
            exit,
            configs,
            commands,
        } => {
            class = CommandClass::Sequence;
            let built: Vec<SeqCommand> = commands.iter().map(|c| c.build()).collect();
            match controller.load_sequence(
                &built,
                exit.build(),
                configs.unwrap_or_else(RadioConfig::default_flight),
            ) {
                Ok(()) => GroundResponse::ok(command.id),
                Err(e) => GroundResponse::failed(command.id, 1, e.to_string()),
            }
        }
        GroundRequest::SetSequenceReady { ready } => {
            controller.set_sequence_ready(ready);
            GroundResponse::ok(command.id)
        }
    };

    // Sequence uploads receipt their own commands as PENDING entries.
    if class == CommandClass::Immediate {
        controller.record_command_outcome(CommandOutcome {
            cmd_id: command.id,
            class,
            status: response.status,
            opcode: None,
        });
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SimBus;

    #[test]
    fn test_ping_is_receipted_as_immediate() {
        let mut controller = Controller::new(SimBus::new());
        let response = dispatch(
            &mut controller,
            GroundCommand {
                id: 42,
                request: GroundRequest::Ping,
            },
        );
        assert_eq!(response.status, 0);
        let poll = &controller.state().response_poll;
        assert_eq!(poll.len(), 1);
        assert_eq!(poll.entries()[0].cmd_id, 42);
        assert!(poll.entries()[0].is_immediate());
    }

    #[test]
    fn test_load_sequence_receipts_pending_entries() {
        let mut controller = Controller::new(SimBus::new());
        let wait = CompoundSpec {
            left: ConditionSpec {
                sensor_id: 0,
                comparator: Comparator::GreaterEq,
                value: 0,
            },
            op: CondOp::Just,
            right: None,
        };
        let response = dispatch(
            &mut controller,
            GroundCommand {
                id: 1,
                request: GroundRequest::LoadSequence {
                    exit: CompoundSpec {
                        left: ConditionSpec {
                            sensor_id: 10,
                            comparator: Comparator::Greater,
                            value: 4000,
                        },
                        op: CondOp::Just,
                        right: None,
                    },
                    configs: None,
                    commands: vec![
                        SeqCommandSpec {
                            cmd_id: 100,
                            opcode: Opcode::StartSequence,
                            wait,
                            params: None,
                        },
                        SeqCommandSpec {
                            cmd_id: 101,
                            opcode: Opcode::EndSequence,
                            wait,
                            params: None,
                        },
                    ],
                },
            },
        );
        assert_eq!(response.status, 0);
        assert_eq!(controller.state().sequence.queue.count(), 2);

        let poll = &controller.state().response_poll;
        assert_eq!(poll.len(), 2);
        assert!(poll
            .entries()
            .iter()
            .all(|e| e.is_pending() && e.status == crate::response::PENDING_STATUS));
    }
}
