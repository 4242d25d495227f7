//! Drive command to wheel command translation
//!
//! Pipeline per tick: differential mix, magnitude normalization, per-side
//! ramp limiting, speed cap. The normalization step divides both sides by
//! the same factor, so the signed difference `right - left` keeps its sign
//! and the turn ratio survives saturation.

use crate::config::MotorConfig;

/// Per-side wheel command, both in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelCommand {
    pub left: f64,
    pub right: f64,
}

impl WheelCommand {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Stateful translator carrying the ramp history.
#[derive(Debug, Clone)]
pub struct MotorTranslator {
    turn_sensitivity: f64,
    ramp_rate: f64,
    max_speed: f64,
    previous: WheelCommand,
}

/// Differential mix: turn_rate shifts speed between the sides.
pub fn mix(speed: f64, turn_rate: f64, turn_sensitivity: f64) -> (f64, f64) {
    let turn = turn_rate * turn_sensitivity;
    (speed - turn, speed + turn)
}

/// Scale both sides down so the larger magnitude is at most 1, preserving
/// the signed difference between them.
pub fn normalize(left_raw: f64, right_raw: f64) -> (f64, f64) {
    let m = left_raw.abs().max(right_raw.abs()).max(1.0);
    (left_raw / m, right_raw / m)
}

impl MotorTranslator {
    pub fn new(config: &MotorConfig) -> Self {
        Self {
            turn_sensitivity: config.turn_sensitivity,
            ramp_rate: config.ramp_rate.clamp(0.01, 1.0),
            max_speed: config.max_speed.clamp(0.0, 1.0),
            previous: WheelCommand::zero(),
        }
    }

    /// Translate one normalized drive command into wheel commands.
    pub fn translate(&mut self, speed: f64, turn_rate: f64) -> WheelCommand {
        let (left_raw, right_raw) = mix(speed, turn_rate, self.turn_sensitivity);
        let (left, right) = normalize(left_raw, right_raw);
        self.ramp_to(left * self.max_speed, right * self.max_speed)
    }

    /// Apply an explicit per-wheel pair (manual drive), still ramped and
    /// capped.
    pub fn apply_differential(&mut self, left: f64, right: f64) -> WheelCommand {
        let (left, right) = normalize(left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0));
        self.ramp_to(left * self.max_speed, right * self.max_speed)
    }

    fn ramp_to(&mut self, left_target: f64, right_target: f64) -> WheelCommand {
        let left = ramp_step(self.previous.left, left_target, self.ramp_rate);
        let right = ramp_step(self.previous.right, right_target, self.ramp_rate);
        let command = WheelCommand {
            left: left.clamp(-1.0, 1.0),
            right: right.clamp(-1.0, 1.0),
        };
        self.previous = command;
        command
    }

    /// Last emitted pair
    pub fn current(&self) -> WheelCommand {
        self.previous
    }

    /// Whether the output has settled at zero
    pub fn is_stopped(&self) -> bool {
        self.previous.is_zero()
    }

    /// Drop the ramp history (after an emergency stop forced the outputs
    /// to zero out of band).
    pub fn reset(&mut self) {
        self.previous = WheelCommand::zero();
    }

    pub fn set_max_speed(&mut self, speed: f64) {
        self.max_speed = speed.clamp(0.0, 1.0);
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }
}

fn ramp_step(previous: f64, target: f64, rate: f64) -> f64 {
    let delta = target - previous;
    previous + delta.clamp(-rate, rate)
}
