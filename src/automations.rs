//! Supervisory automations: auto-sleep and the routine step sequencer.
//!
//! Re-evaluated once per status message arriving from the control
//! context (cooperative, not timer-driven):
//!
//! ```text
//!  status queue ──▶ Automations ──▶ settings manager (sleep mode)
//!                       │
//!                       └─────────▶ command queue (routine entry
//!                                   commands, blocking enqueue)
//! ```
//!
//! A routine is an ordered list of steps. Step 0 is reserved as the
//! idle/reset step; loading a routine jumps to step 1. Each tick the
//! current step's exit conditions are evaluated in declaration order and
//! the first satisfied one wins. Entering a step replays its entry
//! commands into the command queue as blocking enqueues: if the queue is
//! full the supervisory loop stalls rather than dropping part of a
//! routine. Brewing stopping is an absolute reset condition; whatever
//! step was active, the routine returns to step 0.

use std::sync::Arc;

use log::{info, warn};

use crate::command::{FlowMode, SystemCommand};
use crate::controller::CommandQueue;
use crate::ports::FlashPort;
use crate::settings::SettingsManager;
use crate::status::StatusMessage;
use crate::time::{Clock, Duration, Instant};

pub const MAX_ROUTINE_STEPS: usize = 16;
pub const MAX_STEP_COMMANDS: usize = 8;
pub const MAX_EXIT_CONDITIONS: usize = 4;

/// What ends a routine step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitConditionKind {
    /// A brew has started (rising edge of the brew switch).
    BrewStart,
    /// Total brew duration reached `value` seconds.
    BrewTimeAbsolute,
    /// Time in the current step reached `value` seconds.
    StepTime,
}

#[derive(Debug, Clone, Copy)]
pub struct ExitCondition {
    pub kind: ExitConditionKind,
    pub value: f32,
    pub exit_to_step: u16,
}

/// One routine step: commands replayed on entry plus the conditions
/// that leave it.
#[derive(Debug, Clone, Default)]
pub struct RoutineStep {
    pub entry_commands: heapless::Vec<SystemCommand, MAX_STEP_COMMANDS>,
    pub exit_conditions: heapless::Vec<ExitCondition, MAX_EXIT_CONDITIONS>,
}

pub struct Automations<C: Clock> {
    clock: C,
    command_queue: Arc<CommandQueue>,

    routine: heapless::Vec<RoutineStep, MAX_ROUTINE_STEPS>,
    current_step: u16,
    loaded_routine: u16,
    step_started_at: Option<Instant>,

    brew_started_at: Option<Instant>,
    planned_auto_sleep_at: Option<Instant>,

    previously_brewing: bool,
    previously_asleep: bool,
    previous_auto_sleep_minutes: u16,
}

impl<C: Clock> Automations<C> {
    pub fn new(
        clock: C,
        command_queue: Arc<CommandQueue>,
        initially_asleep: bool,
        auto_sleep_minutes: u16,
    ) -> Self {
        let mut automations = Self {
            clock,
            command_queue,
            routine: heapless::Vec::new(),
            current_step: 0,
            loaded_routine: 0,
            step_started_at: None,
            brew_started_at: None,
            planned_auto_sleep_at: None,
            previously_brewing: false,
            previously_asleep: initially_asleep,
            previous_auto_sleep_minutes: auto_sleep_minutes,
        };
        automations.install_default_routine();
        automations
    }

    /// The stock pre-infusion routine: wait for the brew to start, run
    /// full flow for the first four seconds of the shot, drop to low
    /// flow for ten seconds, then full flow until the brew ends.
    fn install_default_routine(&mut self) {
        let full_flow = SystemCommand::SetFlowMode(FlowMode::PumpOnSolenoidOpen);
        let low_flow = SystemCommand::SetFlowMode(FlowMode::PumpOffSolenoidOpen);

        let mut routine: heapless::Vec<RoutineStep, MAX_ROUTINE_STEPS> = heapless::Vec::new();
        let _ = routine.push(RoutineStep::default()); // Step 0: idle.

        let mut step1 = RoutineStep::default();
        let _ = step1.exit_conditions.push(ExitCondition {
            kind: ExitConditionKind::BrewStart,
            value: 0.0,
            exit_to_step: 2,
        });
        let _ = routine.push(step1);

        let mut step2 = RoutineStep::default();
        let _ = step2.entry_commands.push(full_flow);
        let _ = step2.exit_conditions.push(ExitCondition {
            kind: ExitConditionKind::BrewTimeAbsolute,
            value: 4.0,
            exit_to_step: 3,
        });
        let _ = routine.push(step2);

        let mut step3 = RoutineStep::default();
        let _ = step3.entry_commands.push(low_flow);
        let _ = step3.exit_conditions.push(ExitCondition {
            kind: ExitConditionKind::StepTime,
            value: 10.0,
            exit_to_step: 4,
        });
        let _ = routine.push(step3);

        let mut step4 = RoutineStep::default();
        let _ = step4.entry_commands.push(full_flow);
        let _ = routine.push(step4);

        self.routine = routine;
    }

    // ── Observers ─────────────────────────────────────────────

    pub fn current_step(&self) -> u16 {
        self.current_step
    }

    pub fn loaded_routine(&self) -> u16 {
        self.loaded_routine
    }

    /// Seconds until the planned auto-sleep fires; `None` when disabled.
    pub fn planned_sleep_in_seconds(&self) -> Option<f32> {
        self.planned_auto_sleep_at.map(|at| {
            at.saturating_duration_since(self.clock.now()).as_secs_f32()
        })
    }

    // ── External triggers ─────────────────────────────────────

    /// Load a routine and jump to its first step.
    pub fn enqueue_routine(&mut self, routine_id: u16) {
        info!("routine {routine_id} loaded");
        self.loaded_routine = routine_id;
        self.move_to_step(1);
    }

    pub fn cancel_routine(&mut self) {
        self.move_to_step(0);
    }

    /// Called when sleep mode is exited from outside (companion command)
    /// so the inactivity deadline restarts.
    pub fn exiting_sleep<F: FlashPort>(&mut self, settings: &SettingsManager<F>) {
        self.reset_planned_sleep(settings.auto_sleep_minutes());
    }

    // ── Per-status-message evaluation ─────────────────────────

    pub fn tick<F: FlashPort>(&mut self, sm: &StatusMessage, settings: &mut SettingsManager<F>) {
        if self.planned_auto_sleep_at.is_none() {
            self.reset_planned_sleep(settings.auto_sleep_minutes());
        } else if !settings.sleep_mode()
            && self
                .planned_auto_sleep_at
                .is_some_and(|at| self.clock.now() >= at)
        {
            info!("auto-sleep deadline reached");
            settings.set_sleep_mode(true);
        }

        if sm.currently_brewing && !self.previously_brewing {
            self.on_brew_started(settings);
        } else if self.previously_brewing && !sm.currently_brewing {
            self.on_brew_ended();
        }

        // Leaving sleep mode re-arms the inactivity deadline.
        if !sm.sleep_mode && self.previously_asleep {
            self.reset_planned_sleep(settings.auto_sleep_minutes());
        }

        if self.previous_auto_sleep_minutes != settings.auto_sleep_minutes() {
            self.reset_planned_sleep(settings.auto_sleep_minutes());
        }

        self.previously_brewing = sm.currently_brewing;
        self.previously_asleep = sm.sleep_mode;
        self.previous_auto_sleep_minutes = settings.auto_sleep_minutes();

        self.evaluate_current_step(sm);
    }

    // ── Internal ──────────────────────────────────────────────

    fn reset_planned_sleep(&mut self, minutes: u16) {
        if minutes > 0 {
            let delay = Duration::from_secs(u64::from(minutes) * 60);
            self.planned_auto_sleep_at = Some(self.clock.now() + delay);
        } else {
            self.planned_auto_sleep_at = None;
        }
    }

    fn on_brew_started<F: FlashPort>(&mut self, settings: &mut SettingsManager<F>) {
        self.brew_started_at = Some(self.clock.now());

        // Starting a brew exits sleep mode.
        if settings.sleep_mode() {
            settings.set_sleep_mode(false);
        }

        self.reset_planned_sleep(settings.auto_sleep_minutes());
    }

    fn on_brew_ended(&mut self) {
        self.brew_started_at = None;
        // Brewing stopping resets the routine unconditionally.
        if self.current_step > 0 {
            self.move_to_step(0);
        }
    }

    fn evaluate_current_step(&mut self, sm: &StatusMessage) {
        let Some(step) = self.routine.get(self.current_step as usize) else {
            // Unreachable unless the routine shrank under us.
            warn!("routine step {} out of range", self.current_step);
            self.move_to_step(0);
            return;
        };

        // First satisfied condition wins, in declaration order.
        for condition in step.exit_conditions.clone() {
            let satisfied = match condition.kind {
                ExitConditionKind::BrewStart => sm.currently_brewing,
                ExitConditionKind::BrewTimeAbsolute => {
                    self.current_brew_time_secs() >= condition.value
                }
                ExitConditionKind::StepTime => self.current_step_time_secs() >= condition.value,
            };
            if satisfied {
                self.move_to_step(condition.exit_to_step);
                return;
            }
        }
    }

    fn move_to_step(&mut self, step: u16) {
        let step = if (step as usize) < self.routine.len() {
            step
        } else {
            warn!("routine step {step} out of range");
            0
        };
        info!("routine step {step}");

        // Entry commands must all land; block on a full queue rather
        // than running a partial step.
        for command in self.routine[step as usize].entry_commands.clone() {
            self.command_queue.add_blocking(command);
        }

        self.current_step = step;
        self.step_started_at = Some(self.clock.now());

        if step == 0 {
            self.unload_routine();
        }
    }

    fn unload_routine(&mut self) {
        self.loaded_routine = 0;
        self.current_step = 0;
        self.step_started_at = None;
    }

    fn current_brew_time_secs(&self) -> f32 {
        self.brew_started_at.map_or(0.0, |since| {
            self.clock.now().saturating_duration_since(since).as_secs_f32()
        })
    }

    fn current_step_time_secs(&self) -> f32 {
        self.step_started_at.map_or(0.0, |since| {
            self.clock.now().saturating_duration_since(since).as_secs_f32()
        })
    }
}
