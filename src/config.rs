//! Machine configuration record.
//!
//! [`MachineSettings`] is the persisted, authoritative configuration.
//! The supervisory context owns it through the settings manager; the
//! control context holds a mirror kept consistent via the command queue.

use serde::{Deserialize, Serialize};

/// PID tuning parameters for one boiler.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Lower clamp on the accumulated integral term.
    pub windup_low: f32,
    /// Upper clamp on the accumulated integral term.
    pub windup_high: f32,
}

/// Run-time telemetry from a boiler controller, reported in every status
/// message so the companion UI can plot the loop terms.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidRuntime {
    pub hysteresis_mode: bool,
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub integral: f32,
}

/// The persisted configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineSettings {
    /// Correction added to the brew boiler reading to estimate group-head
    /// temperature.
    pub brew_temperature_offset: f32,
    pub sleep_mode: bool,
    pub eco_mode: bool,
    pub steam_only_mode: bool,
    pub standby_mode: bool,
    /// Brew boiler setpoint (°C).
    pub brew_temperature_target: f32,
    /// Service (steam) boiler setpoint (°C).
    pub service_temperature_target: f32,
    /// Minutes of inactivity before auto-sleep; 0 disables.
    pub auto_sleep_minutes: u16,
    pub brew_pid: PidParams,
    pub service_pid: PidParams,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            brew_temperature_offset: -10.0,
            sleep_mode: false,
            eco_mode: false,
            steam_only_mode: false,
            standby_mode: false,
            brew_temperature_target: 105.0,
            service_temperature_target: 120.0,
            auto_sleep_minutes: 0,
            brew_pid: PidParams {
                kp: 0.8,
                ki: 0.12,
                kd: 12.0,
                windup_low: -7.0,
                windup_high: 7.0,
            },
            service_pid: PidParams {
                kp: 0.6,
                ki: 0.1,
                kd: 1.0,
                windup_low: -10.0,
                windup_high: 10.0,
            },
        }
    }
}

impl MachineSettings {
    /// Brew setpoint as the companion UI sees it (offset-corrected).
    pub fn offset_brew_target(&self) -> f32 {
        self.brew_temperature_target + self.brew_temperature_offset
    }
}
