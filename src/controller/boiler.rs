//! Per-boiler control capability.
//!
//! The system controller consumes boilers through [`BoilerControl`]:
//! once per macro-cycle it asks for a desired slot count (0..=25) given
//! the current average temperature, an optional feed-forward term and a
//! hysteresis-force flag, and it pushes setpoint changes down whenever
//! settings change.
//!
//! Two implementations ship:
//!
//! - [`HybridBoilerController`] (brew boiler): bang-bang far from the
//!   setpoint, PID inside a band around it. Hysteresis can also be
//!   forced from outside (heatup stages drive the boiler flat out).
//! - [`HysteresisBoilerController`] (service boiler): plain thermostat
//!   behavior; steam temperature does not need tight regulation.

use crate::config::{PidParams, PidRuntime};
use crate::controller::power::SLOTS_PER_CYCLE;

/// Control capability the system controller consumes.
pub trait BoilerControl {
    /// Desired heating slots for the next macro-cycle.
    fn control_signal(&mut self, current_temp: f32, feed_forward: f32, force_hysteresis: bool)
    -> u8;

    fn update_set_point(&mut self, set_point: f32);

    /// Loop telemetry for the status message.
    fn runtime_parameters(&self) -> PidRuntime;
}

// ── PID core ──────────────────────────────────────────────────

/// Positional PID with integral windup clamping.
///
/// Evaluated once per macro-cycle with a fixed step, so the gains are
/// tuned in slots-per-cycle units directly.
#[derive(Debug, Clone)]
struct PidCore {
    params: PidParams,
    set_point: f32,
    integral: f32,
    prev_error: f32,
    runtime: PidRuntime,
}

impl PidCore {
    fn new(params: PidParams, set_point: f32) -> Self {
        Self {
            params,
            set_point,
            integral: 0.0,
            prev_error: 0.0,
            runtime: PidRuntime::default(),
        }
    }

    fn compute(&mut self, measurement: f32) -> f32 {
        let error = self.set_point - measurement;

        self.integral = (self.integral + error)
            .clamp(self.params.windup_low, self.params.windup_high);

        let p = self.params.kp * error;
        let i = self.params.ki * self.integral;
        let d = self.params.kd * (error - self.prev_error);
        self.prev_error = error;

        self.runtime = PidRuntime {
            hysteresis_mode: false,
            p,
            i,
            d,
            integral: self.integral,
        };

        (p + i + d).clamp(0.0, f32::from(SLOTS_PER_CYCLE))
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }
}

// ── Hybrid controller (brew boiler) ───────────────────────────

/// Bang-bang outside `pid_band` degrees of the setpoint, PID inside.
pub struct HybridBoilerController {
    pid: PidCore,
    /// Half-width of the band (°C) within which PID takes over.
    pid_band: f32,
    hysteresis_mode: bool,
}

impl HybridBoilerController {
    pub fn new(params: PidParams, set_point: f32, pid_band: f32) -> Self {
        Self {
            pid: PidCore::new(params, set_point),
            pid_band,
            hysteresis_mode: true,
        }
    }

    pub fn set_pid_parameters(&mut self, params: PidParams) {
        self.pid.params = params;
    }
}

impl BoilerControl for HybridBoilerController {
    fn control_signal(
        &mut self,
        current_temp: f32,
        feed_forward: f32,
        force_hysteresis: bool,
    ) -> u8 {
        let error = self.pid.set_point - current_temp;

        if force_hysteresis || error.abs() > self.pid_band {
            // Thermostat branch: flat out below, off above. Reset the
            // loop so the PID hand-over starts without stale windup.
            self.pid.reset();
            self.hysteresis_mode = true;
            return if error > 0.0 { SLOTS_PER_CYCLE } else { 0 };
        }

        self.hysteresis_mode = false;
        // Feed-forward raises demand as the shot drains the boiler; it is
        // applied as a virtual droop on the measurement.
        let signal = self.pid.compute(current_temp - feed_forward);
        signal.round() as u8
    }

    fn update_set_point(&mut self, set_point: f32) {
        self.pid.set_point = set_point;
    }

    fn runtime_parameters(&self) -> PidRuntime {
        PidRuntime {
            hysteresis_mode: self.hysteresis_mode,
            ..self.pid.runtime
        }
    }
}

// ── Hysteresis controller (service boiler) ────────────────────

/// Plain thermostat: full demand below `set_point - delta`, zero above
/// `set_point + delta`, previous output in between.
pub struct HysteresisBoilerController {
    set_point: f32,
    delta: f32,
    heating: bool,
}

impl HysteresisBoilerController {
    pub fn new(set_point: f32, delta: f32) -> Self {
        Self {
            set_point,
            delta,
            heating: false,
        }
    }
}

impl BoilerControl for HysteresisBoilerController {
    fn control_signal(
        &mut self,
        current_temp: f32,
        _feed_forward: f32,
        _force_hysteresis: bool,
    ) -> u8 {
        if current_temp < self.set_point - self.delta {
            self.heating = true;
        } else if current_temp > self.set_point + self.delta {
            self.heating = false;
        }
        if self.heating && self.set_point > 0.0 {
            SLOTS_PER_CYCLE
        } else {
            0
        }
    }

    fn update_set_point(&mut self, set_point: f32) {
        self.set_point = set_point;
    }

    fn runtime_parameters(&self) -> PidRuntime {
        PidRuntime {
            hysteresis_mode: true,
            ..PidRuntime::default()
        }
    }
}
