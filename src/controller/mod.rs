//! System controller: the hard real-time control state machine.
//!
//! Runs on the control context at a fixed cadence and mediates between
//! the analog control board (sensors) and the relay board (actuators):
//!
//! ```text
//!        ┌──────────────────────────────────────────────────────┐
//!        │                  SystemController                    │
//!  18 B  │  validate → parse → latches/averages → power share   │  5 B
//! ───────▶  state machine: NOT_STARTED → RUNNING ⇄ SOFT/HARD    ▶───────
//!  frame │                 bail (fail-safe output)              │ frame
//!        └───────▲──────────────────────────────────┬───────────┘
//!                │ command queue                    │ status queue
//!            supervisory ctx                    supervisory ctx
//! ```
//!
//! Every iteration sends the actuator frame *before* reading, so a hung
//! sensor read can never extend the time actuators run unsupervised.
//! Any read or validation failure drives the output to the constant
//! safe frame; soft bails recover on their own after two clean seconds,
//! hard bails only via an explicit unbail command.

pub mod boiler;
pub mod filter;
pub mod power;

use std::sync::Arc;

use log::{error, info, warn};

use crate::command::{FlowMode, SystemCommand};
use crate::config::{MachineSettings, PidRuntime};
use crate::controller::boiler::{BoilerControl, HybridBoilerController, HysteresisBoilerController};
use crate::controller::filter::{Latch, MovingAverage};
use crate::controller::power::{SlotQueue, SsrState, share_slots};
use crate::ports::SerialPort;
use crate::protocol::control_board::{self, ControlBoardParsedPacket, ControlBoardRawPacket};
use crate::protocol::relay_board::{self, RelayBoardParsedPacket, RelayBoardRawPacket};
use crate::queue::SpscQueue;
use crate::status::{BailReason, CoalescedState, MachineState, RunState, StatusMessage};
use crate::time::{Clock, Duration, Instant};

pub const STATUS_QUEUE_CAPACITY: usize = 100;
pub const COMMAND_QUEUE_CAPACITY: usize = 100;

pub type StatusQueue = SpscQueue<StatusMessage, STATUS_QUEUE_CAPACITY>;
pub type CommandQueue = SpscQueue<SystemCommand, COMMAND_QUEUE_CAPACITY>;

/// Control cycle while running; one power-share slot per cycle.
const CYCLE: Duration = Duration::from_millis(100);
/// Relaxed cadence before the supervisory context sends `Begin`.
const IDLE_CYCLE: Duration = Duration::from_millis(1000);
/// Clean reads must span this long before a soft bail self-clears.
const UNBAIL_WINDOW: Duration = Duration::from_secs(2);
/// Heatup stage 2 holds the brew boiler hot for this long.
const HEATUP_STAGE2_HOLD: Duration = Duration::from_secs(4 * 60);

/// Rolling temperature window, in samples.
const TEMP_WINDOW: usize = 20;

/// Heatup drives the brew boiler to this setpoint...
const HEATUP_SET_POINT: f32 = 130.0;
/// ...and hands over to stage 2 once the boiler crosses this.
const HEATUP_STAGE1_EXIT: f32 = 128.0;
/// Heatup is entered automatically when the target is above / current
/// below these on the first normal-state evaluation.
const HEATUP_AUTO_TARGET_ABOVE: f32 = 80.0;
const HEATUP_AUTO_CURRENT_BELOW: f32 = 65.0;

/// Sleep mode clamps the brew setpoint to at most this.
const SLEEP_BREW_CEILING: f32 = 70.0;

/// Brew PID hands over from bang-bang within this band (°C).
const BREW_PID_BAND: f32 = 2.0;
/// Service thermostat half-width (°C).
const SERVICE_HYSTERESIS_DELTA: f32 = 0.5;

/// Feed-forward ramp on the brew controller input during a shot:
/// `k * elapsed_ms + m` degrees of virtual droop.
const FEED_FORWARD_K: f32 = 1.0e-4;
const FEED_FORWARD_M: f32 = 0.0;

/// Coalesced-state tolerance bands (°C).
const BREW_WARM_BAND: f32 = 2.0;
const SERVICE_WARM_BAND: f32 = 4.0;

pub struct SystemController<S: SerialPort, C: Clock> {
    serial: S,
    clock: C,
    status_queue: Arc<StatusQueue>,
    command_queue: Arc<CommandQueue>,

    state: MachineState,
    run_state: RunState,
    bail_reason: BailReason,
    bail_counter: u16,

    /// Mirror of the authoritative settings, updated only via commands.
    settings: MachineSettings,
    flow_mode: FlowMode,

    brew_boiler: HybridBoilerController,
    service_boiler: HysteresisBoilerController,
    brew_pid_runtime: PidRuntime,
    service_pid_runtime: PidRuntime,

    brew_temp_avg: MovingAverage<TEMP_WINDOW>,
    service_temp_avg: MovingAverage<TEMP_WINDOW>,
    water_tank_empty_latch: Latch,
    service_boiler_low_latch: Latch,

    slot_queue: SlotQueue,
    current_relay: RelayBoardParsedPacket,
    safe_packet: RelayBoardRawPacket,
    latest_parsed: ControlBoardParsedPacket,

    brew_started_at: Option<Instant>,
    unbail_timer: Option<Instant>,
    heatup_stage2_since: Option<Instant>,

    sb_raw_high_gain: u16,
    sb_raw_low_gain: u16,
}

impl<S: SerialPort, C: Clock> SystemController<S, C> {
    pub fn new(
        serial: S,
        clock: C,
        status_queue: Arc<StatusQueue>,
        command_queue: Arc<CommandQueue>,
    ) -> Self {
        let settings = MachineSettings::default();
        Self {
            serial,
            clock,
            status_queue,
            command_queue,
            state: MachineState::NotStartedYet,
            run_state: RunState::Undetermined,
            bail_reason: BailReason::None,
            bail_counter: 0,
            brew_boiler: HybridBoilerController::new(
                settings.brew_pid,
                settings.brew_temperature_target,
                BREW_PID_BAND,
            ),
            service_boiler: HysteresisBoilerController::new(
                settings.service_temperature_target,
                SERVICE_HYSTERESIS_DELTA,
            ),
            settings,
            flow_mode: FlowMode::default(),
            brew_pid_runtime: PidRuntime::default(),
            service_pid_runtime: PidRuntime::default(),
            brew_temp_avg: MovingAverage::new(),
            service_temp_avg: MovingAverage::new(),
            water_tank_empty_latch: Latch::new(false),
            service_boiler_low_latch: Latch::new(false),
            slot_queue: SlotQueue::new(),
            current_relay: RelayBoardParsedPacket::default(),
            safe_packet: relay_board::safe_packet(),
            latest_parsed: ControlBoardParsedPacket::default(),
            brew_started_at: None,
            unbail_timer: None,
            heatup_stage2_since: None,
            sb_raw_high_gain: 0,
            sb_raw_low_gain: 0,
        }
    }

    // ── Observers (used by tests and the runtime glue) ────────

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn bail_reason(&self) -> BailReason {
        self.bail_reason
    }

    pub fn is_bailed(&self) -> bool {
        matches!(self.state, MachineState::SoftBail | MachineState::HardBail)
    }

    /// Access to the control-board link (simulator and test harnesses).
    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    // ── Per-iteration entry point ─────────────────────────────

    /// Run one control iteration. Returns the deadline the caller must
    /// sleep until before the next call (cooperative scheduling; there
    /// is no preemption inside an iteration).
    pub fn tick(&mut self) -> Instant {
        if self.state == MachineState::NotStartedYet {
            let deadline = self.clock.now() + IDLE_CYCLE;
            self.send_safe_packet();
            self.handle_commands();
            return deadline;
        }

        // Actuator frame goes out before the sensor read, bounding the
        // time actuators can run without supervision.
        self.serial.discard_input();
        self.send_relay_packet();

        // One deadline serves both the sensor read and the cycle pacing.
        let deadline = self.clock.now() + CYCLE;

        let mut raw = ControlBoardRawPacket::default();
        let success = self.serial.read_exact(&mut raw.bytes, deadline);

        if !success {
            self.soft_bail(BailReason::ControlBoardUnresponsive);
        }

        let validation = control_board::validate(&raw);
        if success && validation != 0 {
            warn!("control board frame failed validation: {validation:#06x}");
        }
        if validation != 0 {
            self.soft_bail(BailReason::ControlBoardPacketInvalid);
        }

        if self.is_bailed() {
            if self.state == MachineState::SoftBail {
                let now = self.clock.now();
                if !success {
                    // Any dropped read restarts the recovery window.
                    self.unbail_timer = None;
                } else if let Some(since) = self.unbail_timer {
                    if now.saturating_duration_since(since) > UNBAIL_WINDOW {
                        self.unbail();
                    }
                } else {
                    self.unbail_timer = Some(now);
                }
            }
        } else if self.state == MachineState::Running {
            self.latest_parsed = control_board::parse(&raw);
            self.evaluate_run_state();
        }

        self.sb_raw_high_gain = raw.service_high_gain() as u16;
        self.sb_raw_low_gain = raw.service_low_gain() as u16;
        // `raw` is dropped here; every iteration starts from a fresh
        // receive buffer.

        self.handle_commands();

        self.current_relay = if self.is_bailed() {
            relay_board::convert_to_parsed(&self.safe_packet)
        } else {
            self.compute_relay_output(self.latest_parsed)
        };

        let message = self.build_status();
        // Status delivery is best-effort: a full queue drops the message
        // rather than ever blocking the control loop.
        let _ = self.status_queue.try_add(message);

        deadline
    }

    /// Transmit the fail-safe frame. Usable from any state, including
    /// before `Begin`.
    pub fn send_safe_packet(&mut self) {
        self.serial.discard_input();
        let packet = self.safe_packet;
        self.serial.write_all(&packet.bytes);
    }

    // ── Outgoing actuator frame ───────────────────────────────

    fn send_relay_packet(&mut self) {
        let raw = relay_board::convert_to_raw(&self.current_relay);

        // An invalid frame of our own making is a logic bug, not an
        // environmental condition.
        if relay_board::validate(&raw) != 0 {
            self.hard_bail(BailReason::RelayPacketInvalid);
        }

        let packet = if self.only_send_safe_packets() {
            self.safe_packet
        } else {
            raw
        };
        self.serial.write_all(&packet.bytes);
    }

    fn only_send_safe_packets(&self) -> bool {
        self.state != MachineState::Running
    }

    // ── Core control decision ─────────────────────────────────

    fn compute_relay_output(&mut self, parsed: ControlBoardParsedPacket) -> RelayBoardParsedPacket {
        let mut relay = RelayBoardParsedPacket::default();

        self.water_tank_empty_latch.set(parsed.water_tank_empty);
        self.service_boiler_low_latch.set(parsed.service_boiler_low);

        self.brew_temp_avg.add_value(parsed.brew_boiler_temperature);
        self.service_temp_avg.add_value(parsed.service_boiler_temperature);

        let mut brewing = false;

        if self.brew_started_at.is_none() {
            // Not brewing: an empty tank blocks starting a brew or a
            // service-boiler refill.
            if !self.water_tank_empty_latch.get() {
                if parsed.brew_switch {
                    self.apply_flow_mode(&mut relay);
                    brewing = true;
                    self.on_brew_started();
                } else if self.service_boiler_low_latch.get() {
                    // Starting a brew has priority over a refill.
                    relay.pump_on = true;
                    relay.water_line_solenoid_open = true;
                    relay.service_boiler_solenoid_open = true;
                }
            }
        } else if parsed.brew_switch {
            // A running brew is never interrupted by a newly-empty tank.
            self.apply_flow_mode(&mut relay);
            brewing = true;
        } else {
            self.on_brew_ended();
        }

        if self.slot_queue.is_empty() {
            let feed_forward = self.brew_started_at.map_or(0.0, |since| {
                let elapsed_ms =
                    self.clock.now().saturating_duration_since(since).as_millis() as f32;
                FEED_FORWARD_K * elapsed_ms + FEED_FORWARD_M
            });

            let brew_demand = self.brew_boiler.control_signal(
                self.brew_temp_avg.average(),
                if brewing { feed_forward } else { 0.0 },
                self.force_brew_hysteresis(),
            );
            let mut service_demand =
                self.service_boiler
                    .control_signal(self.service_temp_avg.average(), 0.0, false);

            if self.settings.eco_mode {
                service_demand = 0;
            }

            let (brew, service, off) = share_slots(brew_demand, service_demand, brewing);
            self.slot_queue.refill(brew, service, off);
        }

        match self.slot_queue.pop() {
            Some(SsrState::BrewOn) => relay.brew_boiler_ssr_on = true,
            Some(SsrState::ServiceOn) => relay.service_boiler_ssr_on = true,
            Some(SsrState::BothOff) => {}
            None => {
                self.hard_bail(BailReason::SlotQueueEmpty);
                return relay;
            }
        }

        self.brew_pid_runtime = self.brew_boiler.runtime_parameters();
        self.service_pid_runtime = self.service_boiler.runtime_parameters();

        relay
    }

    fn apply_flow_mode(&self, relay: &mut RelayBoardParsedPacket) {
        relay.pump_on = self.flow_mode.pump_on();
        relay.water_line_solenoid_open = self.flow_mode.solenoid_open();
    }

    fn force_brew_hysteresis(&self) -> bool {
        matches!(
            self.run_state,
            RunState::HeatupStage1 | RunState::HeatupStage2
        )
    }

    fn on_brew_started(&mut self) {
        info!("brew started");
        self.brew_started_at = Some(self.clock.now());
    }

    fn on_brew_ended(&mut self) {
        info!("brew ended");
        self.brew_started_at = None;
    }

    // ── Run-state (heatup) sub-machine ────────────────────────

    fn evaluate_run_state(&mut self) {
        match self.run_state {
            RunState::Undetermined => {
                if self.settings.brew_temperature_target > HEATUP_AUTO_TARGET_ABOVE
                    && self.latest_parsed.brew_boiler_temperature < HEATUP_AUTO_CURRENT_BELOW
                {
                    self.initiate_heatup();
                } else {
                    self.run_state = RunState::Normal;
                }
            }
            RunState::HeatupStage1 => {
                if self.latest_parsed.brew_boiler_temperature > HEATUP_STAGE1_EXIT {
                    info!("heatup stage 2");
                    self.run_state = RunState::HeatupStage2;
                    self.heatup_stage2_since = Some(self.clock.now());
                    self.update_controller_setpoints();
                }
            }
            RunState::HeatupStage2 => {
                let expired = self.heatup_stage2_since.is_some_and(|since| {
                    self.clock.now().saturating_duration_since(since) > HEATUP_STAGE2_HOLD
                });
                if expired {
                    self.finish_heatup();
                }
            }
            RunState::Normal => {}
        }
    }

    fn initiate_heatup(&mut self) {
        info!("heatup stage 1");
        self.run_state = RunState::HeatupStage1;
        self.update_controller_setpoints();
    }

    fn finish_heatup(&mut self) {
        self.run_state = RunState::Normal;
        self.heatup_stage2_since = None;
        self.update_controller_setpoints();
    }

    // ── Command application ───────────────────────────────────

    fn handle_commands(&mut self) {
        // Drain everything enqueued since the last iteration, then
        // recompute setpoints once, so a batch of changes lands
        // atomically relative to the next control decision.
        while let Some(command) = self.command_queue.try_remove() {
            self.apply_command(command);
        }
        self.update_controller_setpoints();
    }

    fn apply_command(&mut self, command: SystemCommand) {
        match command {
            SystemCommand::SetBrewSetPoint(v) => {
                self.settings.brew_temperature_target = v;
            }
            SystemCommand::SetOffsetBrewSetPoint(v) => {
                self.settings.brew_temperature_target = v - self.settings.brew_temperature_offset;
            }
            SystemCommand::SetBrewOffset(v) => {
                self.settings.brew_temperature_offset = v;
            }
            SystemCommand::SetBrewPidParameters(p) => {
                self.settings.brew_pid = p;
            }
            SystemCommand::SetServiceSetPoint(v) => {
                self.settings.service_temperature_target = v;
            }
            SystemCommand::SetServicePidParameters(p) => {
                self.settings.service_pid = p;
            }
            SystemCommand::SetEcoMode(on) => {
                self.settings.eco_mode = on;
            }
            SystemCommand::SetSteamOnlyMode(on) => {
                self.settings.steam_only_mode = on;
            }
            SystemCommand::SetSleepMode(on) => {
                if on {
                    self.finish_heatup();
                }
                self.settings.sleep_mode = on;
            }
            SystemCommand::SetStandbyMode(on) => {
                if on {
                    self.finish_heatup();
                }
                self.settings.standby_mode = on;
            }
            // Auto-sleep is enforced on the supervisory side.
            SystemCommand::SetAutoSleepMinutes(_) => {}
            SystemCommand::SetFlowMode(mode) => {
                self.flow_mode = mode;
            }
            SystemCommand::Unbail => self.unbail(),
            SystemCommand::TriggerHeatup => self.initiate_heatup(),
            SystemCommand::CancelHeatup => self.finish_heatup(),
            SystemCommand::Begin => {
                info!("control loop started");
                self.state = MachineState::Running;
            }
            SystemCommand::ForceHardBail => self.hard_bail(BailReason::Forced),
        }
    }

    fn update_controller_setpoints(&mut self) {
        self.brew_boiler.set_pid_parameters(self.settings.brew_pid);

        let mut brew_sp = self.settings.brew_temperature_target;
        let mut service_sp = self.settings.service_temperature_target;

        if self.settings.eco_mode {
            service_sp = 0.0;
        }
        if self.settings.steam_only_mode {
            brew_sp = 0.0;
        }

        let (brew_sp, service_sp) = if self.settings.standby_mode {
            (0.0, 0.0)
        } else if self.settings.sleep_mode {
            (brew_sp.min(SLEEP_BREW_CEILING), 0.0)
        } else {
            match self.run_state {
                RunState::HeatupStage1 => (HEATUP_SET_POINT, 0.0),
                RunState::HeatupStage2 => (HEATUP_SET_POINT, service_sp),
                _ => (brew_sp, service_sp),
            }
        };

        self.brew_boiler.update_set_point(brew_sp);
        self.service_boiler.update_set_point(service_sp);
    }

    // ── Bail handling ─────────────────────────────────────────

    fn soft_bail(&mut self, reason: BailReason) {
        if self.is_bailed() {
            return;
        }
        self.bail_counter += 1;
        self.state = MachineState::SoftBail;
        if self.bail_reason == BailReason::None {
            self.bail_reason = reason;
        }
        warn!(
            "soft bail: {reason:?} (count {count})",
            count = self.bail_counter
        );
    }

    fn hard_bail(&mut self, reason: BailReason) {
        if !self.is_bailed() {
            self.bail_counter += 1;
        }
        self.state = MachineState::HardBail;
        self.bail_reason = reason;
        error!(
            "hard bail: {reason:?} (count {count})",
            count = self.bail_counter
        );
    }

    fn unbail(&mut self) {
        info!("unbailed");
        self.state = MachineState::Running;
        self.run_state = RunState::Undetermined;
        self.bail_reason = BailReason::None;
        self.unbail_timer = None;
    }

    // ── Derived state / status ────────────────────────────────

    fn coalesced_state(&self) -> CoalescedState {
        match self.state {
            MachineState::NotStartedYet => CoalescedState::Undetermined,
            MachineState::SoftBail | MachineState::HardBail => CoalescedState::Bailed,
            MachineState::Running => {
                if self.settings.sleep_mode {
                    return CoalescedState::Sleeping;
                }
                if self.settings.standby_mode {
                    return CoalescedState::Standby;
                }
                match self.run_state {
                    RunState::Undetermined => CoalescedState::Undetermined,
                    RunState::HeatupStage1 | RunState::HeatupStage2 => CoalescedState::Heatup,
                    RunState::Normal => {
                        if self.temperatures_at_set_point() {
                            CoalescedState::Warm
                        } else {
                            CoalescedState::TempsNormalizing
                        }
                    }
                }
            }
        }
    }

    fn temperatures_at_set_point(&self) -> bool {
        if self.settings.standby_mode {
            return true;
        }

        let brew = self.latest_parsed.brew_boiler_temperature;
        let brew_target = self.settings.brew_temperature_target;
        if !self.settings.steam_only_mode
            && (brew < brew_target - BREW_WARM_BAND || brew > brew_target + BREW_WARM_BAND)
        {
            return false;
        }

        let service = self.latest_parsed.service_boiler_temperature;
        let service_target = self.settings.service_temperature_target;
        if !self.settings.eco_mode
            && (service < service_target - SERVICE_WARM_BAND
                || service > service_target + SERVICE_WARM_BAND)
        {
            return false;
        }

        true
    }

    fn build_status(&self) -> StatusMessage {
        let brew_avg = self.brew_temp_avg.average();
        StatusMessage {
            timestamp: self.clock.now(),
            brew_temperature: brew_avg,
            offset_brew_temperature: brew_avg + self.settings.brew_temperature_offset,
            brew_temperature_offset: self.settings.brew_temperature_offset,
            brew_set_point: self.settings.brew_temperature_target,
            offset_brew_set_point: self.settings.offset_brew_target(),
            brew_pid_settings: self.settings.brew_pid,
            brew_pid_runtime: self.brew_pid_runtime,
            service_temperature: self.service_temp_avg.average(),
            service_set_point: self.settings.service_temperature_target,
            service_pid_settings: self.settings.service_pid,
            service_pid_runtime: self.service_pid_runtime,
            brew_ssr_active: self.current_relay.brew_boiler_ssr_on,
            service_ssr_active: self.current_relay.service_boiler_ssr_on,
            eco_mode: self.settings.eco_mode,
            sleep_mode: self.settings.sleep_mode,
            steam_only_mode: self.settings.steam_only_mode,
            standby_mode: self.settings.standby_mode,
            internal_state: self.state,
            run_state: self.run_state,
            coalesced_state: self.coalesced_state(),
            bail_reason: self.bail_reason,
            currently_brewing: !self.is_bailed() && self.latest_parsed.brew_switch,
            currently_filling_service_boiler: self.current_relay.pump_on
                && self.current_relay.service_boiler_solenoid_open,
            water_tank_low: !self.is_bailed() && self.latest_parsed.water_tank_empty,
            bail_counter: self.bail_counter,
            sb_raw_high_gain: self.sb_raw_high_gain,
            sb_raw_low_gain: self.sb_raw_low_gain,
            flow_mode: self.flow_mode,
        }
    }
}
