//! PID controller for heading correction
//!
//! The default navigator configuration uses only the proportional path
//! (K_i = K_d = 0); the integral and derivative terms are wired so non-zero
//! gains can be plugged in without API changes.

/// PID controller with clamped output.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    output_limits: (f64, f64),

    integral: f64,
    last_error: Option<f64>,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, output_limits: (f64, f64)) -> Self {
        Self {
            kp,
            ki,
            kd,
            output_limits,
            integral: 0.0,
            last_error: None,
        }
    }

    /// Proportional-only controller
    pub fn proportional(kp: f64, output_limits: (f64, f64)) -> Self {
        Self::new(kp, 0.0, 0.0, output_limits)
    }

    /// Advance the controller by `dt` seconds with the current error.
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        if dt <= 0.0 {
            return 0.0;
        }

        let p_term = self.kp * error;

        self.integral += error * dt;
        let i_term = self.ki * self.integral;

        let d_term = match self.last_error {
            Some(last) => self.kd * (error - last) / dt,
            None => 0.0,
        };
        self.last_error = Some(error);

        (p_term + i_term + d_term).clamp(self.output_limits.0, self.output_limits.1)
    }

    /// Clear accumulated state (on phase transitions and new targets).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
    }
}
