//! Differential-drive motor output
//!
//! - [`sink`]: the output backend (hardware PWM or simulated)
//! - [`translator`]: (speed, turn) to per-wheel commands with ramp limiting
//! - [`controller`]: command path, emergency stop, and the safety watchdog

pub mod controller;
pub mod sink;
pub mod translator;

pub use controller::{MotorController, MotorStatus};
pub use sink::MotorSink;
pub use translator::{MotorTranslator, WheelCommand};
