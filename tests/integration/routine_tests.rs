//! Routine engine driving the control core through the command queue.

use crate::harness::{MachineFrame, System};
use duetto::command::FlowMode;

#[test]
fn loaded_routine_shapes_the_shot_flow() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    // Load the stock pre-infusion routine.
    sys.automations.enqueue_routine(1);
    assert_eq!(sys.automations.current_step(), 1);

    // Brew starts: step 2 sets full flow.
    sys.run_cycles(&MachineFrame::warm().brewing(), 3);
    assert_eq!(sys.automations.current_step(), 2);
    let relay = sys.last_relay_frame();
    assert!(relay.pump_on);
    assert!(relay.water_line_solenoid_open);
    assert_eq!(sys.latest_status.flow_mode, FlowMode::PumpOnSolenoidOpen);

    // Four seconds into the brew: step 3 drops to low flow (pump off,
    // solenoid open), and the relay output follows.
    sys.run_cycles(&MachineFrame::warm().brewing(), 45);
    assert_eq!(sys.automations.current_step(), 3);
    assert_eq!(sys.latest_status.flow_mode, FlowMode::PumpOffSolenoidOpen);
    let relay = sys.last_relay_frame();
    assert!(!relay.pump_on);
    assert!(relay.water_line_solenoid_open);

    // Ten more seconds: step 4 restores full flow.
    sys.run_cycles(&MachineFrame::warm().brewing(), 110);
    assert_eq!(sys.automations.current_step(), 4);
    assert_eq!(sys.latest_status.flow_mode, FlowMode::PumpOnSolenoidOpen);

    // Brew ends: the routine resets and unloads.
    sys.run_cycles(&MachineFrame::warm(), 3);
    assert_eq!(sys.automations.current_step(), 0);
    assert_eq!(sys.automations.loaded_routine(), 0);
}

#[test]
fn routine_without_brew_stays_armed() {
    let mut sys = System::new();
    sys.start();
    sys.automations.enqueue_routine(2);

    sys.run_cycles(&MachineFrame::warm(), 50);
    assert_eq!(sys.automations.current_step(), 1);
    assert_eq!(sys.automations.loaded_routine(), 2);
}

#[test]
fn cancel_routine_resets_to_idle() {
    let mut sys = System::new();
    sys.start();
    sys.automations.enqueue_routine(3);
    sys.run_cycles(&MachineFrame::warm().brewing(), 3);
    assert!(sys.automations.current_step() > 1);

    sys.automations.cancel_routine();
    assert_eq!(sys.automations.current_step(), 0);
    assert_eq!(sys.automations.loaded_routine(), 0);
}

#[test]
fn auto_sleep_puts_the_machine_to_sleep_end_to_end() {
    let mut sys = System::new();
    sys.start();
    sys.settings.set_auto_sleep_minutes(1);
    sys.run_cycles(&MachineFrame::warm(), 2);

    // 61 seconds of idle cycles.
    sys.run_cycles(&MachineFrame::warm(), 610);

    assert!(sys.settings.sleep_mode());
    assert!(sys.latest_status.sleep_mode);
    assert_eq!(
        sys.latest_status.coalesced_state,
        duetto::status::CoalescedState::Sleeping
    );
}

#[test]
fn brewing_wakes_a_sleeping_machine() {
    let mut sys = System::new();
    sys.start();
    sys.settings.set_sleep_mode(true);
    sys.run_cycles(&MachineFrame::warm(), 3);
    assert!(sys.latest_status.sleep_mode);

    sys.run_cycles(&MachineFrame::warm().brewing(), 3);
    assert!(!sys.settings.sleep_mode());
}
