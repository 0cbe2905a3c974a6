//! Cross-context liveness: a wedged supervisory side gets restarted.

use std::sync::Arc;

use duetto::command::SystemCommand;
use duetto::controller::{CommandQueue, StatusQueue, SystemController};
use duetto::runtime::ControlContext;
use duetto::sim::{NoopWatchdog, RestartCounter, ScriptedSerial};
use duetto::time::TestClock;

use crate::harness::MachineFrame;

fn control_context() -> (
    ControlContext<ScriptedSerial, TestClock, NoopWatchdog, RestartCounter>,
    Arc<StatusQueue>,
    Arc<CommandQueue>,
    TestClock,
    RestartCounter,
) {
    let clock = TestClock::new();
    let status_queue: Arc<StatusQueue> = Arc::new(StatusQueue::new());
    let command_queue: Arc<CommandQueue> = Arc::new(CommandQueue::new());
    let restarts = RestartCounter::new();

    let controller = SystemController::new(
        ScriptedSerial::new(),
        clock.clone(),
        Arc::clone(&status_queue),
        Arc::clone(&command_queue),
    );
    let ctx = ControlContext::new(
        controller,
        clock.clone(),
        NoopWatchdog,
        restarts.clone(),
        Arc::clone(&status_queue),
    );
    (ctx, status_queue, command_queue, clock, restarts)
}

/// Push one sensor frame and step the context. The virtual clock jumps
/// to the cycle deadline inside `step()` via `sleep_until`.
fn step_with_frame(
    ctx: &mut ControlContext<ScriptedSerial, TestClock, NoopWatchdog, RestartCounter>,
) {
    let frame = MachineFrame::warm().bytes();
    ctx.controller_mut().serial_mut().push_frame(&frame);
    ctx.step();
}

#[test]
fn undrained_status_queue_triggers_supervisory_restart() {
    let (mut ctx, status_queue, command_queue, _clock, restarts) = control_context();
    command_queue.try_add(SystemCommand::Begin).unwrap();
    ctx.step(); // Idle tick applies Begin.

    // Nobody drains the status queue: 100 cycles fill it...
    for _ in 0..100 {
        step_with_frame(&mut ctx);
    }
    assert!(status_queue.is_full());
    assert_eq!(restarts.restarts(), 0);

    // ...and 2 more seconds of sustained fullness restart the peer.
    for _ in 0..25 {
        step_with_frame(&mut ctx);
    }
    assert_eq!(restarts.restarts(), 1);
}

#[test]
fn draining_the_queue_disarms_the_restart_timer() {
    let (mut ctx, status_queue, command_queue, _clock, restarts) = control_context();
    command_queue.try_add(SystemCommand::Begin).unwrap();
    ctx.step();

    for _ in 0..100 {
        step_with_frame(&mut ctx);
    }
    assert!(status_queue.is_full());

    // The consumer comes back and drains within the 2 s arming window.
    for _ in 0..10 {
        let _ = status_queue.try_remove();
    }
    for _ in 0..50 {
        step_with_frame(&mut ctx);
        // Keep draining like a healthy supervisory loop.
        while status_queue.try_remove().is_some() {}
    }
    assert_eq!(restarts.restarts(), 0);
}

#[test]
fn restart_repeats_if_the_peer_stays_wedged() {
    let (mut ctx, status_queue, command_queue, _clock, restarts) = control_context();
    command_queue.try_add(SystemCommand::Begin).unwrap();
    ctx.step();

    for _ in 0..100 {
        step_with_frame(&mut ctx);
    }
    assert!(status_queue.is_full());

    // 2 s arm + restart, then a 5 s grace, then another restart.
    for _ in 0..25 {
        step_with_frame(&mut ctx);
    }
    assert_eq!(restarts.restarts(), 1);
    for _ in 0..55 {
        step_with_frame(&mut ctx);
    }
    assert_eq!(restarts.restarts(), 2);
}
