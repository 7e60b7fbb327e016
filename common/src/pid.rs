//! Discrete PID controller driving the valve.
//!
//! The output is recomputed once per sample interval, not on every loop
//! iteration, so loop jitter does not leak into the integral and derivative
//! terms. While inactive or misconfigured the output holds its last value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PidConfig;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("invalid PID configuration: {what}")]
    InvalidConfig { what: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidTunings {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Debug, Clone)]
pub struct PidEngine {
    config: PidConfig,
    active: bool,
    integral: f32,
    previous_error: Option<f32>,
    last_sample_ms: Option<u64>,
    output: f32,
    last_error: Option<ControlError>,
}

impl PidEngine {
    pub fn new(config: PidConfig) -> Self {
        let last_error = Self::validate(&config).err();
        Self {
            output: config.min_output.max(0.0).min(config.max_output.max(0.0)),
            config,
            active: true,
            integral: 0.0,
            previous_error: None,
            last_sample_ms: None,
            last_error,
        }
    }

    pub fn validate(config: &PidConfig) -> Result<(), ControlError> {
        Self::validate_tunings(config.tunings())?;
        if config.sample_interval_ms == 0 {
            return Err(ControlError::InvalidConfig {
                what: "sample interval must be positive",
            });
        }
        if !config.min_output.is_finite() || !config.max_output.is_finite() {
            return Err(ControlError::InvalidConfig {
                what: "output bounds must be finite",
            });
        }
        if config.min_output >= config.max_output {
            return Err(ControlError::InvalidConfig {
                what: "min output must be below max output",
            });
        }
        Ok(())
    }

    fn validate_tunings(tunings: PidTunings) -> Result<(), ControlError> {
        let PidTunings { kp, ki, kd } = tunings;
        if !(kp.is_finite() && ki.is_finite() && kd.is_finite()) {
            return Err(ControlError::InvalidConfig {
                what: "gains must be finite",
            });
        }
        if kp < 0.0 || ki < 0.0 || kd < 0.0 {
            return Err(ControlError::InvalidConfig {
                what: "gains must not be negative",
            });
        }
        Ok(())
    }

    pub fn tunings(&self) -> PidTunings {
        self.config.tunings()
    }

    /// Replaces the gains. The integral restarts from zero so the new gains
    /// don't inherit a windup accumulated under the old ones.
    pub fn set_tunings(&mut self, tunings: PidTunings) -> Result<(), ControlError> {
        Self::validate_tunings(tunings)?;
        self.config.kp = tunings.kp;
        self.config.ki = tunings.ki;
        self.config.kd = tunings.kd;
        self.integral = 0.0;
        self.last_error = Self::validate(&self.config).err();
        Ok(())
    }

    pub fn set_active(&mut self, active: bool) {
        if active && !self.active {
            // Resume without a derivative kick from the stale error.
            self.previous_error = None;
            self.last_sample_ms = None;
        }
        self.active = active;
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn last_error(&self) -> Option<&ControlError> {
        self.last_error.as_ref()
    }

    /// Runs one sample if the interval has elapsed and returns the new
    /// output. `None` means no sample was taken and [`output`](Self::output)
    /// still holds.
    pub fn sample(&mut self, setpoint: f32, measured: f32, now_ms: u64) -> Option<f32> {
        if !self.active || self.last_error.is_some() {
            return None;
        }
        if !setpoint.is_finite() || !measured.is_finite() {
            return None;
        }

        let elapsed_ms = match self.last_sample_ms {
            Some(last) => {
                let elapsed = now_ms.saturating_sub(last);
                if elapsed < self.config.sample_interval_ms {
                    return None;
                }
                elapsed
            }
            None => self.config.sample_interval_ms,
        };
        self.last_sample_ms = Some(now_ms);

        let dt = elapsed_ms as f32 / 1000.0;
        let error = setpoint - measured;
        let derivative = match self.previous_error {
            Some(previous) => (error - previous) / dt,
            None => 0.0,
        };
        self.previous_error = Some(error);

        let PidTunings { kp, ki, kd } = self.config.tunings();
        let candidate_integral = self.integral + error * dt;
        let raw = kp * error + ki * candidate_integral + kd * derivative;

        // Anti-windup: stop integrating while saturated in the error's direction.
        let saturated_high = raw > self.config.max_output && error > 0.0;
        let saturated_low = raw < self.config.min_output && error < 0.0;
        let unclamped = if saturated_high || saturated_low {
            kp * error + ki * self.integral + kd * derivative
        } else {
            self.integral = candidate_integral;
            raw
        };

        self.output = unclamped.clamp(self.config.min_output, self.config.max_output);
        Some(self.output)
    }
}
