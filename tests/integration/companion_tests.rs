//! Companion link commands flowing all the way into the control core.

use crate::harness::{MachineFrame, System};
use duetto::link::{CompanionLink, CompanionRing};
use duetto::protocol::companion::{
    CommandPayload, CompanionCommandType, LinkDirection, LinkError, MessageHeader, MessageType,
    PROTOCOL_VERSION, encode_command_message,
};
use duetto::queue::SpscQueue;
use duetto::sim::ScriptedSerial;
use std::sync::Arc;

fn command_frame(payload: &CommandPayload) -> Vec<u8> {
    let body = encode_command_message(payload);
    let header = MessageHeader {
        direction: LinkDirection::CompanionToController,
        id: 1,
        response_to: 0,
        message_type: MessageType::SystemCommand,
        error: LinkError::None,
        version: PROTOCOL_VERSION,
        length: body.len() as u32,
    };
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(&body);
    frame
}

fn feed(ring: &CompanionRing, bytes: &[u8]) {
    for &b in bytes {
        ring.add_blocking(b);
    }
}

#[test]
fn companion_setpoint_lands_in_the_control_loop() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    let ring: Arc<CompanionRing> = Arc::new(SpscQueue::new());
    let mut link = CompanionLink::new(
        ScriptedSerial::new(),
        sys.clock.clone(),
        Arc::clone(&ring),
        Arc::clone(&sys.command_queue),
    );

    // Companion asks for a 95 °C group-head temperature; with the
    // default -10 offset that is a 105 °C raw target... change it to
    // 90 °C to make the effect visible.
    feed(
        &ring,
        &command_frame(&CommandPayload {
            command_type: CompanionCommandType::SetBrewSetPoint as u32,
            float1: 90.0,
            ..CommandPayload::default()
        }),
    );
    link.poll(&mut sys.settings, &mut sys.automations);

    sys.run_cycles(&MachineFrame::warm(), 2);
    // 90 offset-corrected + 10 = 100 raw.
    assert!((sys.latest_status.brew_set_point - 100.0).abs() < 0.01);
    assert!((sys.settings.target_brew_temp() - 100.0).abs() < 0.01);
}

#[test]
fn companion_routine_command_arms_the_sequencer() {
    let mut sys = System::new();
    sys.start();

    let ring: Arc<CompanionRing> = Arc::new(SpscQueue::new());
    let mut link = CompanionLink::new(
        ScriptedSerial::new(),
        sys.clock.clone(),
        Arc::clone(&ring),
        Arc::clone(&sys.command_queue),
    );

    feed(
        &ring,
        &command_frame(&CommandPayload {
            command_type: CompanionCommandType::EnqueueRoutine as u32,
            int1: 4,
            ..CommandPayload::default()
        }),
    );
    link.poll(&mut sys.settings, &mut sys.automations);

    assert_eq!(sys.automations.loaded_routine(), 4);
    assert_eq!(sys.automations.current_step(), 1);

    // The routine then reacts to a real brew.
    sys.run_cycles(&MachineFrame::warm().brewing(), 3);
    assert_eq!(sys.automations.current_step(), 2);
}

#[test]
fn companion_force_bail_stops_the_machine() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    let ring: Arc<CompanionRing> = Arc::new(SpscQueue::new());
    let mut link = CompanionLink::new(
        ScriptedSerial::new(),
        sys.clock.clone(),
        Arc::clone(&ring),
        Arc::clone(&sys.command_queue),
    );

    feed(
        &ring,
        &command_frame(&CommandPayload {
            command_type: CompanionCommandType::ForceHardBail as u32,
            ..CommandPayload::default()
        }),
    );
    link.poll(&mut sys.settings, &mut sys.automations);

    sys.run_cycles(&MachineFrame::warm(), 2);
    assert_eq!(
        sys.latest_status.internal_state,
        duetto::status::MachineState::HardBail
    );
    // Fail-safe output: nothing energized.
    let relay = sys.last_relay_frame();
    assert_eq!(
        relay,
        duetto::protocol::relay_board::RelayBoardParsedPacket::default()
    );
}
