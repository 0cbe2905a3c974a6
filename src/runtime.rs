//! Execution-context wiring.
//!
//! Two non-preemptive loops, each a tight cycle with cooperative
//! sleep-until-deadline pacing:
//!
//! - [`ControlContext`]: the hard real-time side. Feeds its watchdog,
//!   ticks the system controller, and watches the status queue for
//!   evidence that the supervisory side has wedged.
//! - [`SupervisoryContext`]: drains status messages, runs the
//!   automations engine, polls the companion link and broadcasts
//!   status on a fixed cadence.
//!
//! The only shared state between them is the pair of SPSC queues; each
//! context owns its components outright.

use std::sync::Arc;

use log::warn;

use crate::automations::Automations;
use crate::controller::{CommandQueue, StatusQueue, SystemController};
use crate::link::CompanionLink;
use crate::ports::{CompanionCoreHandle, FlashPort, SerialPort, TemperatureProbe, WatchdogPort};
use crate::settings::SettingsManager;
use crate::status::StatusMessage;
use crate::time::{Clock, Duration, Instant};

/// Status broadcast cadence once settled.
const STATUS_BROADCAST_PERIOD: Duration = Duration::from_millis(250);
/// Initial settle delay before the first broadcast.
const STATUS_BROADCAST_SETTLE: Duration = Duration::from_millis(2500);

// ── Liveness monitor ──────────────────────────────────────────

/// Cross-context watchdog over the status queue.
///
/// A full status queue means the supervisory context has stopped
/// draining. First detection arms a timer; if the queue is still full
/// when it fires, the supervisory context is restarted and given a
/// grace period to resume draining before the next restart. The queue
/// emptying at any point disarms the timer.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    restart_at: Option<Instant>,
}

impl LivenessMonitor {
    /// Queue-full confirmation delay before the first restart.
    pub const ARM_DELAY: Duration = Duration::from_secs(2);
    /// Grace period after a restart before restarting again.
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self { restart_at: None }
    }

    /// Observe the queue state; `true` means restart the peer now.
    pub fn observe(&mut self, queue_full: bool, now: Instant) -> bool {
        match self.restart_at {
            None => {
                if queue_full {
                    self.restart_at = Some(now + Self::ARM_DELAY);
                }
                false
            }
            Some(at) => {
                if !queue_full {
                    self.restart_at = None;
                    false
                } else if now >= at {
                    self.restart_at = Some(now + Self::RETRY_DELAY);
                    true
                } else {
                    false
                }
            }
        }
    }
}

// ── Control context ───────────────────────────────────────────

pub struct ControlContext<S, C, W, H>
where
    S: SerialPort,
    C: Clock,
    W: WatchdogPort,
    H: CompanionCoreHandle,
{
    controller: SystemController<S, C>,
    clock: C,
    watchdog: W,
    companion_core: H,
    monitor: LivenessMonitor,
    status_queue: Arc<StatusQueue>,
}

impl<S, C, W, H> ControlContext<S, C, W, H>
where
    S: SerialPort,
    C: Clock,
    W: WatchdogPort,
    H: CompanionCoreHandle,
{
    pub fn new(
        controller: SystemController<S, C>,
        clock: C,
        watchdog: W,
        companion_core: H,
        status_queue: Arc<StatusQueue>,
    ) -> Self {
        Self {
            controller,
            clock,
            watchdog,
            companion_core,
            monitor: LivenessMonitor::new(),
            status_queue,
        }
    }

    /// One loop iteration: service the watchdog, check peer liveness,
    /// run the controller, sleep to the cycle deadline.
    pub fn step(&mut self) {
        self.watchdog.feed();

        let queue_full = self.status_queue.is_full();
        if self.monitor.observe(queue_full, self.clock.now()) {
            warn!("status queue stuck full; restarting supervisory context");
            self.companion_core.restart();
        }

        let deadline = self.controller.tick();
        self.clock.sleep_until(deadline);
    }

    pub fn run_while(&mut self, keep_running: impl Fn() -> bool) {
        while keep_running() {
            self.step();
        }
    }

    pub fn controller(&self) -> &SystemController<S, C> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SystemController<S, C> {
        &mut self.controller
    }
}

// ── Supervisory context ───────────────────────────────────────

pub struct SupervisoryContext<S, C, F, W>
where
    S: SerialPort,
    C: Clock,
    F: FlashPort,
    W: WatchdogPort,
{
    clock: C,
    watchdog: W,
    status_queue: Arc<StatusQueue>,
    command_queue: Arc<CommandQueue>,
    pub settings: SettingsManager<F>,
    pub automations: Automations<C>,
    pub link: CompanionLink<S, C>,
    probes: Vec<Box<dyn TemperatureProbe + Send>>,
    latest_status: StatusMessage,
    next_broadcast: Instant,
}

impl<S, C, F, W> SupervisoryContext<S, C, F, W>
where
    S: SerialPort,
    C: Clock,
    F: FlashPort,
    W: WatchdogPort,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: C,
        watchdog: W,
        status_queue: Arc<StatusQueue>,
        command_queue: Arc<CommandQueue>,
        settings: SettingsManager<F>,
        automations: Automations<C>,
        link: CompanionLink<S, C>,
        probes: Vec<Box<dyn TemperatureProbe + Send>>,
    ) -> Self {
        let next_broadcast = clock.now() + STATUS_BROADCAST_SETTLE;
        Self {
            clock,
            watchdog,
            status_queue,
            command_queue,
            settings,
            automations,
            link,
            probes,
            latest_status: StatusMessage::default(),
            next_broadcast,
        }
    }

    /// Bring-up: load persisted settings (replaying them into the
    /// command queue) and tell the control core to start.
    pub fn start(&mut self, watchdog_caused_reboot: bool) {
        self.settings.initialize(watchdog_caused_reboot);
        let _ = self.command_queue.try_add(crate::command::SystemCommand::Begin);
    }

    /// One loop iteration.
    pub fn step(&mut self) {
        self.watchdog.feed();

        // Drain everything; only the newest snapshot matters.
        while let Some(sm) = self.status_queue.try_remove() {
            self.latest_status = sm;
        }

        self.link.poll(&mut self.settings, &mut self.automations);
        self.automations.tick(&self.latest_status, &mut self.settings);

        if self.clock.now() >= self.next_broadcast {
            let mut external = [0.0f32; 3];
            for (slot, probe) in external.iter_mut().zip(self.probes.iter_mut()) {
                if probe.is_connected() {
                    if let Some(celsius) = probe.read_celsius() {
                        *slot = celsius;
                    }
                }
            }

            let delivered = self.link.send_status(
                &self.latest_status,
                external,
                self.settings.auto_sleep_minutes(),
                self.automations.planned_sleep_in_seconds(),
                self.automations.loaded_routine(),
                self.automations.current_step(),
            );
            if !delivered {
                warn!("status broadcast not acknowledged");
            }

            self.next_broadcast = self.clock.now() + STATUS_BROADCAST_PERIOD;

            // Piggyback persistence on the broadcast cadence to spare
            // flash erase cycles.
            self.settings.write_if_changed();
        }
    }

    pub fn run_while(&mut self, keep_running: impl Fn() -> bool) {
        while keep_running() {
            self.step();
            std::thread::yield_now();
        }
    }

    pub fn latest_status(&self) -> &StatusMessage {
        &self.latest_status
    }
}
