//! Duetto simulator: the full firmware core running against a simulated
//! machine on a workstation.
//!
//! Three threads stand in for the hardware topology:
//!
//! ```text
//! ┌──────────────┐  18 B frames  ┌──────────────┐  queues  ┌──────────────┐
//! │ sim control  │ ◀──────────▶  │  control ctx │ ◀─────▶  │ supervisory  │
//! │ board+relays │   5 B frames  │  (thread A)  │          │ ctx (thread) │
//! └──────────────┘               └──────────────┘          └──────┬───────┘
//!                                                                │ companion
//!                                                                ▼ serial
//!                                                         (idle; no module)
//! ```
//!
//! A scripted scenario pokes the simulated machine: heat up, pull a
//! shot, let the auto-sleep engine do its thing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use log::info;

use duetto::automations::Automations;
use duetto::controller::{CommandQueue, StatusQueue, SystemController};
use duetto::link::{CompanionLink, CompanionRing};
use duetto::queue::SpscQueue;
use duetto::runtime::{ControlContext, SupervisoryContext};
use duetto::settings::SettingsManager;
use duetto::sim::{
    FixedProbe, MachineInputs, MemFlash, NoopWatchdog, RestartCounter, SimControlBoard, SimSerial,
};
use duetto::time::{Duration, WallClock};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("duetto-sim starting");

    let clock = WallClock::new();
    let status_queue: Arc<StatusQueue> = Arc::new(SpscQueue::new());
    let command_queue: Arc<CommandQueue> = Arc::new(SpscQueue::new());

    // Machine side: simulated control board on one end of the link.
    let (board_serial, controller_serial) = SimSerial::duplex(clock.clone());
    let inputs = MachineInputs::new();
    let mut board = SimControlBoard::new(board_serial, inputs.clone());

    // Companion side: the serial link exists but nothing is attached,
    // so broadcasts go unacknowledged (and say so in the log).
    let (_companion_end, companion_serial) = SimSerial::duplex(clock.clone());
    let ring: Arc<CompanionRing> = Arc::new(SpscQueue::new());

    let settings = SettingsManager::new(MemFlash::new(256), Arc::clone(&command_queue));
    let automations = Automations::new(clock.clone(), Arc::clone(&command_queue), false, 0);
    let link = CompanionLink::new(
        companion_serial,
        clock.clone(),
        ring,
        Arc::clone(&command_queue),
    );

    let controller = SystemController::new(
        controller_serial,
        clock.clone(),
        Arc::clone(&status_queue),
        Arc::clone(&command_queue),
    );

    let mut control_ctx = ControlContext::new(
        controller,
        clock.clone(),
        NoopWatchdog,
        RestartCounter::new(),
        Arc::clone(&status_queue),
    );

    let mut supervisory_ctx = SupervisoryContext::new(
        clock.clone(),
        NoopWatchdog,
        status_queue,
        command_queue,
        settings,
        automations,
        link,
        vec![Box::new(FixedProbe {
            connected: true,
            celsius: 24.5,
        })],
    );

    let running = Arc::new(AtomicBool::new(true));

    let control_running = Arc::clone(&running);
    let control_thread = std::thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            control_ctx.run_while(|| control_running.load(Ordering::Relaxed));
        })?;

    let supervisory_running = Arc::clone(&running);
    let supervisory_thread = std::thread::Builder::new()
        .name("supervisory".into())
        .spawn(move || {
            supervisory_ctx.start(false);
            supervisory_ctx.run_while(|| supervisory_running.load(Ordering::Relaxed));
        })?;

    let board_running = Arc::clone(&running);
    let board_thread = std::thread::Builder::new()
        .name("control-board".into())
        .spawn(move || {
            while board_running.load(Ordering::Relaxed) {
                board.step(Duration::from_millis(100));
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        })?;

    // Scripted scenario: warm up, pull a 20 s shot, cool off.
    info!("scenario: warming up for 30 s");
    std::thread::sleep(std::time::Duration::from_secs(30));

    info!("scenario: pulling a shot");
    inputs.set_brew_switch(true);
    std::thread::sleep(std::time::Duration::from_secs(20));
    inputs.set_brew_switch(false);

    info!("scenario: idle cooldown");
    std::thread::sleep(std::time::Duration::from_secs(10));

    running.store(false, Ordering::Relaxed);
    control_thread.join().expect("control thread panicked");
    supervisory_thread
        .join()
        .expect("supervisory thread panicked");
    board_thread.join().expect("board thread panicked");

    info!("duetto-sim done");
    Ok(())
}
