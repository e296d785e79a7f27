use satcore::controller::{CommandClass, CommandOutcome};
use satcore::ground::{self, GroundCommand, GroundRequest};
use satcore::response::{
    RespEntry, ENTRY_WIRE_BYTES, PENDING_STATUS, RESPONSE_POLL_CAPACITY,
};
use satcore::{Controller, SimBus};

fn immediate_outcome(cmd_id: u16, status: u8) -> CommandOutcome {
    CommandOutcome {
        cmd_id,
        class: CommandClass::Immediate,
        status,
        opcode: None,
    }
}

fn pending_outcome(cmd_id: u16) -> CommandOutcome {
    CommandOutcome {
        cmd_id,
        class: CommandClass::Sequence,
        status: 0,
        opcode: None,
    }
}

#[test]
fn test_overflow_never_evicts_pending() {
    let mut controller = Controller::new(SimBus::new());
    controller.bus_mut().set_epoch(50);

    for id in 0..40 {
        controller.record_command_outcome(pending_outcome(id));
    }
    for id in 40..RESPONSE_POLL_CAPACITY as u16 {
        controller.record_command_outcome(immediate_outcome(id, 0));
    }
    assert_eq!(
        controller.state().response_poll.len(),
        RESPONSE_POLL_CAPACITY
    );

    controller.record_command_outcome(immediate_outcome(999, 1));

    let poll = &controller.state().response_poll;
    assert_eq!(poll.len(), RESPONSE_POLL_CAPACITY);
    assert_eq!(poll.entries().iter().filter(|e| e.is_pending()).count(), 40);
    assert!(poll.entries().iter().all(|e| e.cmd_id != 40));
    assert_eq!(poll.entries()[RESPONSE_POLL_CAPACITY - 1].cmd_id, 999);
}

#[test]
fn test_downlink_serialization_round_trip() {
    let mut controller = Controller::new(SimBus::new());
    controller.bus_mut().set_epoch(0x01020304);
    controller.record_command_outcome(immediate_outcome(0x00AA, 7));
    controller.record_command_outcome(pending_outcome(0x00BB));

    let bytes = controller.response_poll_bytes();
    assert_eq!(bytes.len(), 2 * ENTRY_WIRE_BYTES);

    let mut parsed = Vec::new();
    for chunk in bytes.chunks_exact(ENTRY_WIRE_BYTES) {
        let cmd_id = u16::from_be_bytes([chunk[0], chunk[1]]);
        let status = chunk[2];
        let epoch = u32::from_be_bytes([chunk[3], chunk[4], chunk[5], chunk[6]]);
        parsed.push((cmd_id, status, epoch));
    }
    assert_eq!(
        parsed,
        vec![
            (0x00AA, 7, 0x01020304),
            (0x00BB, PENDING_STATUS, 0x01020304),
        ]
    );
}

#[test]
fn test_ground_clear_command_semantics() {
    let mut controller = Controller::new(SimBus::new());
    controller.record_command_outcome(immediate_outcome(1, 0));
    controller.record_command_outcome(pending_outcome(2));

    // Deleting the pending entry is refused with the is-pending code.
    let refused = ground::dispatch(
        &mut controller,
        GroundCommand {
            id: 900,
            request: GroundRequest::ClearResponsePoll { cmd_id: 2 },
        },
    );
    assert_eq!(refused.status, 0xFE);
    assert!(controller
        .state()
        .response_poll
        .entries()
        .iter()
        .any(|e| e.cmd_id == 2));

    // The clear-all id wipes everything, including pendings.
    let cleared = ground::dispatch(
        &mut controller,
        GroundCommand {
            id: 901,
            request: GroundRequest::ClearResponsePoll { cmd_id: 0xFFFF },
        },
    );
    assert_eq!(cleared.status, 0);
    // Only the receipt of the clear command itself remains.
    let poll = &controller.state().response_poll;
    assert_eq!(poll.len(), 1);
    assert_eq!(poll.entries()[0].cmd_id, 901);
}

#[test]
fn test_update_pending_is_atomic_for_ground() {
    let mut controller = Controller::new(SimBus::new());
    controller.bus_mut().set_epoch(10);
    controller.record_command_outcome(pending_outcome(5));

    controller
        .store_mut()
        .update(|s| s.response_poll.update_pending(RespEntry::pending_complete(5, 30, 0)));

    let entries = controller.state().response_poll;
    let matching: Vec<_> = entries
        .entries()
        .iter()
        .filter(|e| e.cmd_id == 5)
        .collect();
    assert_eq!(matching.len(), 1);
    assert!(matching[0].is_pending_complete());
}
