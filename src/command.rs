//! Commands into the control core.
//!
//! [`SystemCommand`] is the only way the supervisory context (settings
//! manager, automations, companion link) mutates control-core state.
//! Commands travel over the command queue and are drained in full once
//! per control iteration, so a batch of settings changes takes effect
//! atomically relative to the next control decision.

use crate::config::PidParams;

/// Pump / water-line solenoid combination that governs the water path
/// while a brew is active.
///
/// Discriminants are the wire encoding used on the companion link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FlowMode {
    #[default]
    PumpOnSolenoidOpen = 0,
    PumpOnSolenoidClosed = 1,
    PumpOffSolenoidOpen = 3,
    PumpOffSolenoidClosed = 4,
}

impl FlowMode {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::PumpOnSolenoidOpen),
            1 => Some(Self::PumpOnSolenoidClosed),
            3 => Some(Self::PumpOffSolenoidOpen),
            4 => Some(Self::PumpOffSolenoidClosed),
            _ => None,
        }
    }

    pub fn pump_on(self) -> bool {
        matches!(self, Self::PumpOnSolenoidOpen | Self::PumpOnSolenoidClosed)
    }

    pub fn solenoid_open(self) -> bool {
        matches!(self, Self::PumpOnSolenoidOpen | Self::PumpOffSolenoidOpen)
    }
}

/// A control-core mutation request.
///
/// Each variant carries exactly the data it needs; wire tags that do not
/// decode to a variant are dropped at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SystemCommand {
    SetBrewSetPoint(f32),
    /// Setpoint expressed in offset-corrected (group-head) degrees.
    SetOffsetBrewSetPoint(f32),
    SetBrewOffset(f32),
    SetBrewPidParameters(PidParams),
    SetServiceSetPoint(f32),
    SetServicePidParameters(PidParams),
    SetEcoMode(bool),
    SetSteamOnlyMode(bool),
    SetSleepMode(bool),
    SetStandbyMode(bool),
    /// Mirrored for completeness; auto-sleep is enforced on the
    /// supervisory side, so the control core ignores it.
    SetAutoSleepMinutes(u16),
    SetFlowMode(FlowMode),
    Unbail,
    TriggerHeatup,
    CancelHeatup,
    /// Start the control loop proper (sent once the supervisory context
    /// is up and draining the status queue).
    Begin,
    ForceHardBail,
}
