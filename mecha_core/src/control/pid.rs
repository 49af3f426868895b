//! PID regulator with variable timestep.
//!
//! `dt` is the elapsed time between successive [`PidRegulator::update`]
//! calls, taken from the caller-supplied timestamps rather than a fixed
//! cycle period. A zero or negative `dt` contributes no integral and no
//! derivative for that call.
//!
//! The integral term accumulates `error × dt` and is weighted by `ki` at
//! output time. By default the integral is unbounded (no anti-windup);
//! [`AntiWindup`] selects an opt-in limiting strategy. An optional
//! first-order low-pass (`derivative_filter_s`) smooths the derivative.

use mecha_common::time::Timestamp;
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;

use crate::error::{ConfigError, PidError};

/// Integral windup handling.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AntiWindup {
    /// Plain accumulation; the integral may grow while the output saturates.
    #[default]
    None,
    /// Clamp the accumulated integral to `[-limit, limit]`.
    IntegralClamp { limit: f64 },
    /// Back-calculation: bleed the previous saturation excess back into the
    /// integral with tracking time constant `tracking_time` [s].
    BackCalculation { tracking_time: f64 },
}

/// Gains, setpoint, and output bounds for one regulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    /// Lower output bound (may be `-inf` for unbounded).
    pub output_min: f64,
    /// Upper output bound (may be `+inf` for unbounded).
    pub output_max: f64,
    /// Derivative low-pass time constant [s] (0 = unfiltered).
    #[serde(default)]
    pub derivative_filter_s: f64,
    #[serde(default)]
    pub anti_windup: AntiWindup,
}

impl PidParams {
    /// Gains with setpoint 0 and unbounded output.
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
            derivative_filter_s: 0.0,
            anti_windup: AntiWindup::None,
        }
    }

    pub const fn with_setpoint(mut self, setpoint: f64) -> Self {
        self.setpoint = setpoint;
        self
    }

    pub const fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub const fn with_derivative_filter(mut self, tf: f64) -> Self {
        self.derivative_filter_s = tf;
        self
    }

    pub const fn with_anti_windup(mut self, anti_windup: AntiWindup) -> Self {
        self.anti_windup = anti_windup;
        self
    }

    /// Check every parameter. Gains, setpoint, and filter must be finite;
    /// bounds may be infinite but not NaN and not inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gains(self.kp, self.ki, self.kd)?;
        finite("setpoint", self.setpoint)?;
        finite("derivative_filter_s", self.derivative_filter_s)?;
        if self.derivative_filter_s < 0.0 {
            return Err(ConfigError::NegativeDerivativeFilter(
                self.derivative_filter_s,
            ));
        }
        validate_bounds(self.output_min, self.output_max)?;
        match self.anti_windup {
            AntiWindup::None => {}
            AntiWindup::IntegralClamp { limit } => {
                if limit.is_nan() || limit < 0.0 {
                    return Err(ConfigError::InvalidAntiWindup(
                        "integral clamp limit must be >= 0",
                    ));
                }
            }
            AntiWindup::BackCalculation { tracking_time } => {
                if !tracking_time.is_finite() || tracking_time <= 0.0 {
                    return Err(ConfigError::InvalidAntiWindup(
                        "back-calculation tracking time must be finite and > 0",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinitePidParameter { name, value })
    }
}

fn validate_gains(kp: f64, ki: f64, kd: f64) -> Result<(), ConfigError> {
    finite("kp", kp)?;
    finite("ki", ki)?;
    finite("kd", kd)
}

fn validate_bounds(min: f64, max: f64) -> Result<(), ConfigError> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(ConfigError::InvalidOutputBounds { min, max });
    }
    Ok(())
}

/// Term breakdown of the most recent update, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    /// Elapsed time used for this update [s] (0 on the first call).
    pub dt: f64,
    pub error: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    /// Unclamped sum `p + i + d`.
    pub raw: f64,
    /// Clamped output.
    pub output: f64,
}

impl PidTerms {
    /// True if clamping changed the output.
    #[inline]
    pub fn saturated(&self) -> bool {
        self.raw != self.output
    }
}

/// Internal regulator state. Integral and previous error are always
/// reset together.
#[derive(Debug, Clone, Copy, Default)]
struct PidState {
    integral: f64,
    prev_error: f64,
    derivative_filtered: f64,
    prev_raw_output: f64,
    prev_time: Option<Timestamp>,
}

/// Continuous regulation loop converting a measurement into a bounded
/// control output.
///
/// Single writer: `update`, `set_tuning`, and `reset` take `&mut self`.
#[derive(Debug, Clone)]
pub struct PidRegulator {
    params: PidParams,
    state: PidState,
    last: PidTerms,
}

impl PidRegulator {
    /// Validate `params` and create a regulator with zeroed state.
    pub fn new(params: PidParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self {
            params,
            state: PidState::default(),
            last: PidTerms::default(),
        })
    }

    /// Compute one regulation step.
    ///
    /// `now` must not decrease between calls. The first call after
    /// construction has no previous timestamp and runs with `dt = 0`.
    ///
    /// # Errors
    /// `PidError::NonFiniteInput` if `measurement` is NaN or infinite, or if
    /// `setpoint - measurement` overflows; the regulator state is not
    /// modified.
    pub fn update(&mut self, measurement: f64, now: Timestamp) -> Result<f64, PidError> {
        if !measurement.is_finite() {
            return Err(PidError::NonFiniteInput {
                name: "measurement",
                value: measurement,
            });
        }

        let error = self.params.setpoint - measurement;
        if !error.is_finite() {
            return Err(PidError::NonFiniteInput {
                name: "error",
                value: error,
            });
        }

        let p = &self.params;
        let s = &mut self.state;

        let dt = match s.prev_time {
            Some(prev) => now.secs_since(prev),
            None => 0.0,
        };
        if dt < 0.0 {
            tracing::debug!(dt, "PID timestamp went backwards; skipping I and D");
        }

        // ── P term ──────────────────────────────────────────────
        let p_term = p.kp * error;

        // ── I term ──────────────────────────────────────────────
        if dt > 0.0 {
            let correction = match p.anti_windup {
                AntiWindup::BackCalculation { tracking_time } if p.ki != 0.0 => {
                    let saturated = s.prev_raw_output.clamp(p.output_min, p.output_max);
                    (saturated - s.prev_raw_output) / (p.ki * tracking_time)
                }
                _ => 0.0,
            };
            let mut integral = s.integral + (error + correction) * dt;
            if let AntiWindup::IntegralClamp { limit } = p.anti_windup {
                integral = integral.clamp(-limit, limit);
            }
            // An overflowed integral would pin the output to one bound.
            if integral.is_finite() {
                s.integral = integral;
            } else {
                tracing::warn!(integral, "PID integral overflow; keeping previous value");
            }
        }
        let i_term = p.ki * s.integral;

        // ── D term ──────────────────────────────────────────────
        let derivative = if dt > 0.0 {
            let raw_derivative = match (error - s.prev_error) / dt {
                d if d.is_finite() => d,
                _ => 0.0,
            };
            if p.derivative_filter_s > 0.0 {
                let alpha = dt / (p.derivative_filter_s + dt);
                let filtered = s.derivative_filtered + alpha * (raw_derivative - s.derivative_filtered);
                if filtered.is_finite() {
                    s.derivative_filtered = filtered;
                }
                filtered
            } else {
                raw_derivative
            }
        } else {
            0.0
        };
        let d_term = p.kd * derivative;

        let raw = p_term + i_term + d_term;
        // A NaN sum (inf - inf from overflowed P and I terms) falls back to
        // the clamped zero so the bounds always hold.
        let output = if raw.is_nan() {
            0.0_f64.clamp(p.output_min, p.output_max)
        } else {
            raw.clamp(p.output_min, p.output_max)
        };

        s.prev_error = error;
        s.prev_raw_output = raw;
        s.prev_time = Some(now);

        self.last = PidTerms {
            dt: dt.max(0.0),
            error,
            p: p_term,
            i: i_term,
            d: d_term,
            raw,
            output,
        };
        Ok(output)
    }

    /// Replace the gains. Integral and previous error are kept; call
    /// [`PidRegulator::reset`] for a clean restart.
    pub fn set_tuning(&mut self, kp: f64, ki: f64, kd: f64) -> Result<(), ConfigError> {
        validate_gains(kp, ki, kd)?;
        self.params.kp = kp;
        self.params.ki = ki;
        self.params.kd = kd;
        tracing::debug!(kp, ki, kd, "PID tuning changed");
        Ok(())
    }

    /// Change the target value.
    pub fn set_setpoint(&mut self, setpoint: f64) -> Result<(), PidError> {
        if !setpoint.is_finite() {
            return Err(PidError::NonFiniteInput {
                name: "setpoint",
                value: setpoint,
            });
        }
        self.params.setpoint = setpoint;
        Ok(())
    }

    /// Change the output bounds.
    pub fn set_output_limits(&mut self, min: f64, max: f64) -> Result<(), ConfigError> {
        validate_bounds(min, max)?;
        self.params.output_min = min;
        self.params.output_max = max;
        Ok(())
    }

    /// Zero integral, previous error, and filter state; the next update
    /// measures `dt` from `now`.
    pub fn reset(&mut self, now: Timestamp) {
        self.state = PidState {
            prev_time: Some(now),
            ..PidState::default()
        };
        self.last = PidTerms::default();
    }

    #[inline]
    pub fn params(&self) -> &PidParams {
        &self.params
    }

    #[inline]
    pub fn setpoint(&self) -> f64 {
        self.params.setpoint
    }

    /// Accumulated `∫ error dt`.
    #[inline]
    pub fn integral(&self) -> f64 {
        self.state.integral
    }

    #[inline]
    pub fn previous_error(&self) -> f64 {
        self.state.prev_error
    }

    #[inline]
    pub fn previous_time(&self) -> Option<Timestamp> {
        self.state.prev_time
    }

    #[inline]
    pub fn last_terms(&self) -> &PidTerms {
        &self.last
    }

    #[inline]
    pub fn last_output(&self) -> f64 {
        self.last.output
    }
}

assert_impl_all!(PidRegulator: Send, Sync);

// ─── Tests ──────────────────────────────────────────────────────────
