//! PID regulator.
//!
//! Direct-gain form: `output = Kp*e + integral(Ki*e) - Kd*d(input)/dt`
//! with `e = setpoint - input`. The derivative acts on the measurement
//! rather than the error so setpoint steps do not kick the output, and
//! the integral term is clamped to the output limits to avoid windup.
//! Time is passed in by the caller, which keeps the math testable.

use std::time::Instant;

/// Operating state of one control loop.
///
/// OFF and MANUAL still compute and record the output every cycle;
/// only AUTO dispatches it to the output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidState {
    Off,
    Manual,
    Auto,
}

impl PidState {
    /// Map the stored numeric code (0/1/2); anything else is OFF.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => PidState::Manual,
            2 => PidState::Auto,
            _ => PidState::Off,
        }
    }

    pub fn dispatches(self) -> bool {
        matches!(self, PidState::Auto)
    }
}

/// One PID regulator instance.
#[derive(Debug)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    output_limits: (Option<f64>, Option<f64>),
    auto_mode: bool,

    proportional: f64,
    integral: f64,
    derivative: f64,
    last_time: Option<Instant>,
    last_input: Option<f64>,
    last_output: Option<f64>,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            output_limits: (None, None),
            auto_mode: true,
            proportional: 0.0,
            integral: 0.0,
            derivative: 0.0,
            last_time: None,
            last_input: None,
            last_output: None,
        }
    }

    /// Clamp the output (and the integral term) to `[lower, upper]`.
    /// `None` leaves that side unbounded.
    pub fn set_output_limits(&mut self, lower: Option<f64>, upper: Option<f64>) {
        self.output_limits = (lower, upper);
        self.integral = self.clamp(self.integral);
        if let Some(out) = self.last_output {
            self.last_output = Some(self.clamp(out));
        }
    }

    pub fn output_limits(&self) -> (Option<f64>, Option<f64>) {
        self.output_limits
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    /// Enable or disable regulation. Enabling seeds the integral from
    /// `last_output` so the loop resumes near the last commanded value
    /// instead of stepping to zero.
    pub fn set_auto_mode(&mut self, enabled: bool, last_output: Option<f64>) {
        if enabled && !self.auto_mode {
            self.proportional = 0.0;
            self.derivative = 0.0;
            self.integral = self.clamp(last_output.unwrap_or(0.0));
            self.last_output = last_output.map(|out| self.clamp(out));
            self.last_time = None;
            self.last_input = None;
        }
        self.auto_mode = enabled;
    }

    /// Advance the regulator with a new measurement.
    ///
    /// While auto mode is off the internal state is frozen and the last
    /// computed output (if any) is returned unchanged.
    pub fn update(&mut self, input: f64, now: Instant) -> Option<f64> {
        if !self.auto_mode {
            return self.last_output;
        }

        let dt = self
            .last_time
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(1e-16)
            .max(1e-16);

        let error = self.setpoint - input;
        let d_input = input - self.last_input.unwrap_or(input);

        self.proportional = self.kp * error;
        self.integral = self.clamp(self.integral + self.ki * error * dt);
        self.derivative = -self.kd * d_input / dt;

        let output = self.clamp(self.proportional + self.integral + self.derivative);

        self.last_time = Some(now);
        self.last_input = Some(input);
        self.last_output = Some(output);
        Some(output)
    }

    /// The individual (P, I, D) contributions of the last update.
    pub fn components(&self) -> (f64, f64, f64) {
        (self.proportional, self.integral, self.derivative)
    }

    /// Clear all internal state; gains and limits are kept.
    pub fn reset(&mut self) {
        self.proportional = 0.0;
        self.integral = self.clamp(0.0);
        self.derivative = 0.0;
        self.last_time = None;
        self.last_input = None;
        self.last_output = None;
    }

    fn clamp(&self, value: f64) -> f64 {
        let value = match self.output_limits.1 {
            Some(upper) => value.min(upper),
            None => value,
        };
        match self.output_limits.0 {
            Some(lower) => value.max(lower),
            None => value,
        }
    }
}
