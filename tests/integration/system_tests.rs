//! End-to-end behavior of the composed control + supervisory slices.

use crate::harness::{MachineFrame, System};
use duetto::command::SystemCommand;
use duetto::status::{BailReason, CoalescedState, MachineState, RunState};

#[test]
fn settings_mirror_reaches_control_core() {
    let mut sys = System::new();
    sys.start();

    sys.settings.set_eco_mode(true);
    sys.settings.set_target_brew_temp(94.0);
    sys.run_cycles(&MachineFrame::warm(), 2);

    assert!(sys.latest_status.eco_mode);
    assert!((sys.latest_status.brew_set_point - 94.0).abs() < f32::EPSILON);
}

#[test]
fn warm_machine_converges_to_warm_state() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 5);
    assert_eq!(sys.latest_status.internal_state, MachineState::Running);
    assert_eq!(sys.latest_status.coalesced_state, CoalescedState::Warm);
}

#[test]
fn cold_machine_walks_the_heatup_states() {
    let mut sys = System::new();
    sys.start();

    sys.run_cycles(&MachineFrame::cold(), 2);
    assert_eq!(sys.latest_status.run_state, RunState::HeatupStage1);
    assert_eq!(sys.latest_status.coalesced_state, CoalescedState::Heatup);

    // Boiler crosses the stage 1 exit threshold.
    let hot = MachineFrame {
        brew_temp: 129.0,
        ..MachineFrame::cold()
    };
    sys.run_cycles(&hot, 2);
    assert_eq!(sys.latest_status.run_state, RunState::HeatupStage2);

    // Stage 2 expires after its four-minute hold (2400 cycles).
    sys.run_cycles(&hot, 2_450);
    assert_eq!(sys.latest_status.run_state, RunState::Normal);
}

#[test]
fn brew_switch_drives_pump_and_status() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    sys.run_cycles(&MachineFrame::warm().brewing(), 2);
    assert!(sys.latest_status.currently_brewing);
    // Default flow mode: pump on, water-line solenoid open.
    let relay = sys.last_relay_frame();
    assert!(relay.pump_on);
    assert!(relay.water_line_solenoid_open);

    sys.run_cycles(&MachineFrame::warm(), 2);
    assert!(!sys.latest_status.currently_brewing);
}

#[test]
fn empty_tank_blocks_new_brews_but_not_running_ones() {
    let mut sys = System::new();
    sys.start();

    // The tank-empty latch needs a few consistent samples.
    sys.run_cycles(&MachineFrame::warm().tank_empty(), 5);
    assert!(sys.latest_status.water_tank_low);

    // Brew switch with an empty tank: the pump never starts (the status
    // still reports the raw switch state).
    sys.run_cycles(&MachineFrame::warm().brewing().tank_empty(), 3);
    assert!(!sys.last_relay_frame().pump_on);

    // Refill the tank, start the brew, then empty it mid-shot: the
    // brew keeps running.
    sys.run_cycles(&MachineFrame::warm(), 5);
    sys.run_cycles(&MachineFrame::warm().brewing(), 2);
    assert!(sys.latest_status.currently_brewing);
    sys.run_cycles(&MachineFrame::warm().brewing().tank_empty(), 5);
    assert!(sys.latest_status.currently_brewing);
    assert!(sys.last_relay_frame().pump_on);
}

#[test]
fn service_boiler_refill_opens_solenoid_with_pump() {
    let mut sys = System::new();
    sys.start();

    sys.run_cycles(&MachineFrame::warm().service_low(), 5);
    let relay = sys.last_relay_frame();
    assert!(relay.pump_on);
    assert!(relay.service_boiler_solenoid_open);
    assert!(sys.latest_status.currently_filling_service_boiler);
}

#[test]
fn soft_bail_recovery_spans_two_clean_seconds() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    sys.cycle_dropped();
    assert_eq!(sys.latest_status.internal_state, MachineState::SoftBail);
    assert_eq!(
        sys.latest_status.bail_reason,
        BailReason::ControlBoardUnresponsive
    );
    let bails_before = sys.latest_status.bail_counter;

    // 2.1 s of clean reads at 100 ms per cycle.
    sys.run_cycles(&MachineFrame::warm(), 22);
    assert_eq!(sys.latest_status.internal_state, MachineState::Running);
    assert_eq!(sys.latest_status.bail_reason, BailReason::None);
    assert_eq!(sys.latest_status.bail_counter, bails_before);
}

#[test]
fn bail_counter_accumulates_across_bails() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    sys.cycle_dropped();
    sys.run_cycles(&MachineFrame::warm(), 25); // Recover.
    sys.cycle_dropped();
    sys.run_cycles(&MachineFrame::warm(), 25); // Recover again.

    assert_eq!(sys.latest_status.bail_counter, 2);
}

#[test]
fn companion_force_bail_requires_explicit_unbail() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    sys.command_queue
        .try_add(SystemCommand::ForceHardBail)
        .unwrap();
    sys.run_cycles(&MachineFrame::warm(), 30);
    assert_eq!(sys.latest_status.internal_state, MachineState::HardBail);
    assert_eq!(sys.latest_status.bail_reason, BailReason::Forced);
    assert_eq!(sys.latest_status.coalesced_state, CoalescedState::Bailed);

    sys.command_queue.try_add(SystemCommand::Unbail).unwrap();
    sys.run_cycles(&MachineFrame::warm(), 2);
    assert_eq!(sys.latest_status.internal_state, MachineState::Running);
}

#[test]
fn sleep_and_standby_report_their_coalesced_states() {
    let mut sys = System::new();
    sys.start();
    sys.run_cycles(&MachineFrame::warm(), 2);

    sys.settings.set_sleep_mode(true);
    sys.run_cycles(&MachineFrame::warm(), 2);
    assert_eq!(sys.latest_status.coalesced_state, CoalescedState::Sleeping);

    sys.settings.set_sleep_mode(false);
    sys.settings.set_standby_mode(true);
    sys.run_cycles(&MachineFrame::warm(), 2);
    assert_eq!(sys.latest_status.coalesced_state, CoalescedState::Standby);

    // Standby holds both boilers off.
    let relay = sys.last_relay_frame();
    assert!(!relay.brew_boiler_ssr_on);
    assert!(!relay.service_boiler_ssr_on);
}

#[test]
fn eco_mode_starves_the_service_boiler() {
    let mut sys = System::new();
    sys.start();
    sys.settings.set_eco_mode(true);

    // Cold service boiler would normally demand heat.
    let frame = MachineFrame {
        brew_temp: 105.0,
        service_temp: 60.0,
        ..MachineFrame::warm()
    };
    // More than one macro-cycle of iterations.
    for _ in 0..30 {
        sys.cycle(&frame);
        assert!(!sys.last_relay_frame().service_boiler_ssr_on);
    }
}

#[test]
fn no_cycle_ever_commands_both_ssrs() {
    let mut sys = System::new();
    sys.start();

    let frames = [
        MachineFrame::cold(),
        MachineFrame::warm(),
        MachineFrame {
            brew_temp: 90.0,
            service_temp: 100.0,
            ..MachineFrame::warm()
        }
        .brewing(),
    ];
    for frame in &frames {
        for _ in 0..60 {
            sys.cycle(frame);
            let relay = sys.last_relay_frame();
            assert!(!(relay.brew_boiler_ssr_on && relay.service_boiler_ssr_on));
        }
    }
}
