//! Simulated first-order thermal plant.
//!
//! Stands in for real hardware in the demo binary and the closed-loop
//! tests: a heated mass losing heat to ambient.
//!
//! ```text
//! dT/dt = (T_ambient − T) / τ + gain · u        u ∈ [0, 100] %
//! ```
//!
//! Integrated exactly for a constant `u` over each step, so any step size
//! is stable.

use mecha_common::time::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Physical parameters of the plant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalParams {
    /// Ambient temperature [°C].
    pub ambient_c: f64,
    /// Cooling time constant τ [s]. Must be > 0.
    pub time_constant_s: f64,
    /// Heating rate per percent of heater power [K/s/%]. Must be ≥ 0.
    pub heater_gain: f64,
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self {
            ambient_c: 20.0,
            time_constant_s: 10.0,
            heater_gain: 0.05,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThermalPlant {
    params: ThermalParams,
    temperature_c: f64,
    heater_pct: f64,
    last_step: Option<Timestamp>,
}

impl ThermalPlant {
    /// Plant at ambient temperature with the heater off.
    pub fn new(params: ThermalParams) -> Result<Self, ConfigError> {
        if !params.ambient_c.is_finite() {
            return Err(ConfigError::InvalidPlantParameter("ambient_c must be finite"));
        }
        if !(params.time_constant_s.is_finite() && params.time_constant_s > 0.0) {
            return Err(ConfigError::InvalidPlantParameter(
                "time_constant_s must be finite and > 0",
            ));
        }
        if !(params.heater_gain.is_finite() && params.heater_gain >= 0.0) {
            return Err(ConfigError::InvalidPlantParameter(
                "heater_gain must be finite and >= 0",
            ));
        }
        Ok(Self {
            params,
            temperature_c: params.ambient_c,
            heater_pct: 0.0,
            last_step: None,
        })
    }

    /// Set heater power, clamped to [0, 100] %. Non-finite input turns the
    /// heater off.
    pub fn set_heater(&mut self, pct: f64) {
        self.heater_pct = if pct.is_finite() {
            pct.clamp(0.0, 100.0)
        } else {
            0.0
        };
    }

    /// Advance the model to `now` with the current heater power. The first
    /// call only stamps the time.
    pub fn step_to(&mut self, now: Timestamp) -> f64 {
        if let Some(prev) = self.last_step {
            let dt = now.secs_since(prev);
            if dt > 0.0 {
                self.advance(dt);
            }
        }
        if self.last_step.is_none_or(|prev| now > prev) {
            self.last_step = Some(now);
        }
        self.temperature_c
    }

    /// Advance by `dt_s` seconds.
    pub fn advance(&mut self, dt_s: f64) {
        if !(dt_s.is_finite() && dt_s > 0.0) {
            return;
        }
        let target = self.steady_state(self.heater_pct);
        let decay = (-dt_s / self.params.time_constant_s).exp();
        self.temperature_c = target + (self.temperature_c - target) * decay;
    }

    /// Equilibrium temperature at constant heater power.
    pub fn steady_state(&self, heater_pct: f64) -> f64 {
        let p = &self.params;
        p.ambient_c + p.heater_gain * p.time_constant_s * heater_pct
    }

    #[inline]
    pub fn temperature(&self) -> f64 {
        self.temperature_c
    }

    #[inline]
    pub fn heater(&self) -> f64 {
        self.heater_pct
    }

    #[inline]
    pub fn params(&self) -> &ThermalParams {
        &self.params
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
