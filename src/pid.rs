//! PID controller for the heating element, suitable for no_std use.
//!
//! - Uses `f32` math
//! - Caller supplies a monotonic `Instant`; calls closer together than the
//!   sample time are skipped and return `None`
//! - Output clamped to configured limits (default 0..100)
//! - Integral anti-windup: accumulator bounded to `output_max / ki`, and
//!   back-calculated whenever the output saturates
//! - Derivative-on-measurement, suppressed on the first run
//!
//! Example
//! ```ignore
//! let mut pid = PidController::new(&PidConfig::default())?;
//! if let Some(power) = pid.evaluate(21.0, current_temp_c, Instant::now()) {
//!     bank.set_power(Channel::All, power as u8)?;
//! }
//! ```

use embassy_time::{Duration, Instant};
use num_traits::float::Float;

use crate::config::{validate_gains, validate_limits, ConfigError, PidConfig};

#[derive(Debug, Clone)]
pub struct PidController {
    // Gains
    kp: f32,
    ki: f32,
    kd: f32,

    // Output limits
    out_min: f32,
    out_max: f32,

    sample_time: Duration,

    // State
    integral: f32,
    last_error: f32,
    last_measurement: f32,
    last_time: Instant,
    first_run: bool,
}

impl PidController {
    pub fn new(config: &PidConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            out_min: config.output_min,
            out_max: config.output_max,
            sample_time: Duration::from_millis(config.sample_time_ms.into()),
            integral: 0.0,
            last_error: 0.0,
            last_measurement: 0.0,
            last_time: Instant::from_ticks(0),
            first_run: true,
        })
    }

    /// Run one PID step if the sample time has elapsed.
    ///
    /// Returns `None` when the call came too early (or `now` went backwards);
    /// the caller must keep its previous command in that case.
    pub fn evaluate(&mut self, setpoint: f32, measurement: f32, now: Instant) -> Option<f32> {
        let dt = if self.first_run {
            duration_secs(self.sample_time)
        } else {
            let elapsed = now.checked_duration_since(self.last_time)?;
            if elapsed < self.sample_time {
                return None;
            }
            duration_secs(elapsed)
        };

        let error = setpoint - measurement;

        let p = self.kp * error;

        self.integral = self.bound_integral(self.integral + error * dt);
        let i = self.ki * self.integral;

        // Derivative on measurement, so setpoint steps cause no kick
        let d = if self.first_run {
            0.0
        } else {
            -self.kd * (measurement - self.last_measurement) / dt
        };

        let unclamped = p + i + d;
        let output = clamp(unclamped, self.out_min, self.out_max);
        if output != unclamped && self.ki != 0.0 {
            self.integral = self.bound_integral((output - p - d) / self.ki);
        }

        self.last_error = error;
        self.last_measurement = measurement;
        self.last_time = now;
        self.first_run = false;

        Some(output)
    }

    /// Clear accumulated state; the next `evaluate` behaves like the first one.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_measurement = 0.0;
        self.first_run = true;
    }

    /// Tune proportional, integral, derivative gains. Negative gains are
    /// rejected and the previous tuning kept.
    pub fn set_tunings(&mut self, kp: f32, ki: f32, kd: f32) -> Result<(), ConfigError> {
        validate_gains(kp, ki, kd)?;
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self.integral = self.bound_integral(self.integral);
        Ok(())
    }

    pub fn set_output_limits(&mut self, min: f32, max: f32) -> Result<(), ConfigError> {
        validate_limits(min, max)?;
        self.out_min = min;
        self.out_max = max;
        self.integral = self.bound_integral(self.integral);
        Ok(())
    }

    pub fn set_sample_time(&mut self, sample_time_ms: u32) -> Result<(), ConfigError> {
        if sample_time_ms == 0 {
            return Err(ConfigError::ZeroSampleTime);
        }
        self.sample_time = Duration::from_millis(sample_time_ms.into());
        Ok(())
    }

    /// Current gains.
    pub fn tunings(&self) -> (f32, f32, f32) {
        (self.kp, self.ki, self.kd)
    }

    pub fn output_limits(&self) -> (f32, f32) {
        (self.out_min, self.out_max)
    }

    pub fn sample_time(&self) -> Duration {
        self.sample_time
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn last_error(&self) -> f32 {
        self.last_error
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    fn bound_integral(&self, integral: f32) -> f32 {
        if self.ki > 0.0 {
            let limit = Float::abs(self.out_max / self.ki);
            clamp(integral, -limit, limit)
        } else {
            integral
        }
    }
}

fn duration_secs(d: Duration) -> f32 {
    d.as_micros() as f32 / 1_000_000.0
}

#[inline]
fn clamp(x: f32, min: f32, max: f32) -> f32 {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}
