//! Control-core state enums and the per-iteration status snapshot.

use crate::command::FlowMode;
use crate::config::{PidParams, PidRuntime};
use crate::time::Instant;

/// Top-level controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MachineState {
    #[default]
    NotStartedYet = 0,
    Running = 1,
    SoftBail = 2,
    HardBail = 3,
}

/// Nested run state, meaningful only while [`MachineState::Running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RunState {
    #[default]
    Undetermined = 0,
    /// Drive the brew boiler to 130 °C; service boiler fully deprioritized.
    HeatupStage1 = 1,
    /// Hold the brew boiler at 130 °C for four minutes; service boiler
    /// back to its normal setpoint.
    HeatupStage2 = 2,
    Normal = 3,
}

/// Why the controller bailed to fail-safe output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BailReason {
    #[default]
    None = 0,
    /// Control board did not deliver a complete frame in time.
    ControlBoardUnresponsive = 1,
    /// Control board frame failed validation.
    ControlBoardPacketInvalid = 2,
    /// An outgoing relay frame failed validation (logic bug).
    RelayPacketInvalid = 3,
    /// The power-share slot queue was unexpectedly empty (logic bug).
    SlotQueueEmpty = 4,
    /// Explicit operator/companion request.
    Forced = 5,
}

/// Single user-facing state derived from the internal state variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CoalescedState {
    #[default]
    Undetermined = 0,
    Heatup = 1,
    TempsNormalizing = 2,
    Warm = 3,
    Sleeping = 4,
    Standby = 5,
    Bailed = 6,
}

/// Snapshot of all control-core derived and raw state, produced once per
/// control iteration and pushed (best-effort) onto the status queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMessage {
    pub timestamp: Instant,
    pub brew_temperature: f32,
    pub offset_brew_temperature: f32,
    pub brew_temperature_offset: f32,
    pub brew_set_point: f32,
    pub offset_brew_set_point: f32,
    pub brew_pid_settings: PidParams,
    pub brew_pid_runtime: PidRuntime,
    pub service_temperature: f32,
    pub service_set_point: f32,
    pub service_pid_settings: PidParams,
    pub service_pid_runtime: PidRuntime,
    pub brew_ssr_active: bool,
    pub service_ssr_active: bool,
    pub eco_mode: bool,
    pub sleep_mode: bool,
    pub steam_only_mode: bool,
    pub standby_mode: bool,
    pub internal_state: MachineState,
    pub run_state: RunState,
    pub coalesced_state: CoalescedState,
    pub bail_reason: BailReason,
    pub currently_brewing: bool,
    pub currently_filling_service_boiler: bool,
    pub water_tank_low: bool,
    pub bail_counter: u16,
    /// Raw service-boiler level words, exposed for diagnostics.
    pub sb_raw_high_gain: u16,
    pub sb_raw_low_gain: u16,
    pub flow_mode: FlowMode,
}
