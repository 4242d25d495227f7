//! Motor output backends
//!
//! Sum-typed: the supervisor and controller only ever see [`MotorSink`],
//! and the backend is chosen once at startup from configuration. The
//! hardware variant drives an L298N-style H-bridge through the Linux sysfs
//! PWM and GPIO interfaces (direction pins plus one hardware PWM channel
//! per side); the simulated variant records what would have been applied.

use crate::config::MotorConfig;
use crate::error::{Error, Result};
use std::fs;
use std::path::PathBuf;

/// H-bridge direction pins per side (BCM numbering, L298N IN1/IN2)
const LEFT_DIR_PINS: (u32, u32) = (17, 22);
const RIGHT_DIR_PINS: (u32, u32) = (23, 24);

/// PWM period: 20 kHz, above the audible range of the drivetrain
const PWM_PERIOD_NS: u64 = 50_000;

/// Motor output sink.
pub enum MotorSink {
    /// L298N H-bridge on sysfs GPIO + PWM
    Gpio(GpioSink),
    /// Bench backend: records the last applied pair
    Simulated(SimulatedSink),
}

impl MotorSink {
    /// Build the backend selected in the configuration.
    pub fn from_config(config: &MotorConfig) -> Result<Self> {
        match config.backend.as_str() {
            "gpio" => Ok(MotorSink::Gpio(GpioSink::initialize()?)),
            "simulated" => Ok(MotorSink::Simulated(SimulatedSink::new())),
            other => Err(Error::Config(format!("unknown motor backend: {}", other))),
        }
    }

    /// Apply a wheel pair, both in [-1, 1].
    pub fn apply_wheels(&mut self, left: f64, right: f64) -> Result<()> {
        match self {
            MotorSink::Gpio(sink) => sink.apply(left, right),
            MotorSink::Simulated(sink) => sink.apply(left, right),
        }
    }

    /// Zero the outputs immediately and hold them disabled until
    /// [`MotorSink::clear_emergency`].
    pub fn apply_emergency_stop(&mut self) -> Result<()> {
        match self {
            MotorSink::Gpio(sink) => sink.emergency_stop(),
            MotorSink::Simulated(sink) => sink.emergency_stop(),
        }
    }

    /// Re-enable output after an emergency stop.
    pub fn clear_emergency(&mut self) {
        match self {
            MotorSink::Gpio(sink) => sink.disabled = false,
            MotorSink::Simulated(sink) => sink.disabled = false,
        }
    }

    /// Last pair actually applied
    pub fn last_applied(&self) -> (f64, f64) {
        match self {
            MotorSink::Gpio(sink) => sink.last,
            MotorSink::Simulated(sink) => sink.last,
        }
    }
}

/// Simulated backend for bench runs and tests.
pub struct SimulatedSink {
    last: (f64, f64),
    disabled: bool,
    applied_count: u64,
}

impl SimulatedSink {
    pub fn new() -> Self {
        log::info!("Motor backend: simulated");
        Self {
            last: (0.0, 0.0),
            disabled: false,
            applied_count: 0,
        }
    }

    fn apply(&mut self, left: f64, right: f64) -> Result<()> {
        if self.disabled {
            return Err(Error::Motor("output disabled by emergency stop".to_string()));
        }
        self.last = (left, right);
        self.applied_count += 1;
        log::trace!("Simulated wheels: L={:.2} R={:.2}", left, right);
        Ok(())
    }

    fn emergency_stop(&mut self) -> Result<()> {
        self.last = (0.0, 0.0);
        self.disabled = true;
        Ok(())
    }

    pub fn applied_count(&self) -> u64 {
        self.applied_count
    }
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new()
    }
}

/// L298N H-bridge through sysfs.
///
/// Each side has two direction pins (IN1/IN2) and one hardware PWM channel
/// on the enable input. Forward is IN1 high, reverse is IN2 high, both low
/// coasts.
pub struct GpioSink {
    left: HBridgeSide,
    right: HBridgeSide,
    last: (f64, f64),
    disabled: bool,
}

impl GpioSink {
    fn initialize() -> Result<Self> {
        log::info!("Motor backend: gpio (L298N via sysfs)");
        let left = HBridgeSide::initialize(LEFT_DIR_PINS, 0)?;
        let right = HBridgeSide::initialize(RIGHT_DIR_PINS, 1)?;
        Ok(Self {
            left,
            right,
            last: (0.0, 0.0),
            disabled: false,
        })
    }

    fn apply(&mut self, left: f64, right: f64) -> Result<()> {
        if self.disabled {
            return Err(Error::Motor("output disabled by emergency stop".to_string()));
        }
        self.left.set(left)?;
        self.right.set(right)?;
        self.last = (left, right);
        Ok(())
    }

    fn emergency_stop(&mut self) -> Result<()> {
        // Zero both sides even if one write fails
        let l = self.left.set(0.0);
        let r = self.right.set(0.0);
        self.last = (0.0, 0.0);
        self.disabled = true;
        l.and(r)
    }
}

impl Drop for GpioSink {
    fn drop(&mut self) {
        if let Err(e) = self.left.set(0.0).and(self.right.set(0.0)) {
            log::error!("Failed to zero motor outputs on shutdown: {}", e);
        }
    }
}

struct HBridgeSide {
    in1: PathBuf,
    in2: PathBuf,
    duty_cycle: PathBuf,
}

impl HBridgeSide {
    fn initialize(dir_pins: (u32, u32), pwm_channel: u32) -> Result<Self> {
        let in1 = export_gpio(dir_pins.0)?;
        let in2 = export_gpio(dir_pins.1)?;
        let duty_cycle = export_pwm(pwm_channel)?;
        Ok(Self {
            in1,
            in2,
            duty_cycle,
        })
    }

    fn set(&mut self, speed: f64) -> Result<()> {
        let speed = speed.clamp(-1.0, 1.0);
        let (fwd, rev) = if speed > 0.0 {
            ("1", "0")
        } else if speed < 0.0 {
            ("0", "1")
        } else {
            ("0", "0")
        };
        fs::write(&self.in1, fwd)?;
        fs::write(&self.in2, rev)?;

        let duty = (speed.abs() * PWM_PERIOD_NS as f64) as u64;
        fs::write(&self.duty_cycle, duty.to_string())?;
        Ok(())
    }
}

fn export_gpio(pin: u32) -> Result<PathBuf> {
    let base = PathBuf::from(format!("/sys/class/gpio/gpio{}", pin));
    if !base.exists() {
        fs::write("/sys/class/gpio/export", pin.to_string())
            .map_err(|e| Error::Motor(format!("cannot export GPIO {}: {}", pin, e)))?;
    }
    fs::write(base.join("direction"), "out")?;
    let value = base.join("value");
    fs::write(&value, "0")?;
    Ok(value)
}

fn export_pwm(channel: u32) -> Result<PathBuf> {
    let base = PathBuf::from(format!("/sys/class/pwm/pwmchip0/pwm{}", channel));
    if !base.exists() {
        fs::write("/sys/class/pwm/pwmchip0/export", channel.to_string())
            .map_err(|e| Error::Motor(format!("cannot export PWM {}: {}", channel, e)))?;
    }
    fs::write(base.join("period"), PWM_PERIOD_NS.to_string())?;
    fs::write(base.join("duty_cycle"), "0")?;
    fs::write(base.join("enable"), "1")?;
    Ok(base.join("duty_cycle"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_records_last_pair() {
        let mut sink = MotorSink::Simulated(SimulatedSink::new());
        sink.apply_wheels(0.4, -0.2).unwrap();
        assert_eq!(sink.last_applied(), (0.4, -0.2));
    }

    #[test]
    fn test_emergency_zeroes_and_disables() {
        let mut sink = MotorSink::Simulated(SimulatedSink::new());
        sink.apply_wheels(0.8, 0.8).unwrap();
        sink.apply_emergency_stop().unwrap();

        assert_eq!(sink.last_applied(), (0.0, 0.0));
        assert!(sink.apply_wheels(0.5, 0.5).is_err());
        assert_eq!(sink.last_applied(), (0.0, 0.0));

        sink.clear_emergency();
        sink.apply_wheels(0.5, 0.5).unwrap();
        assert_eq!(sink.last_applied(), (0.5, 0.5));
    }

    #[test]
    fn test_from_config_simulated() {
        let config = MotorConfig::default();
        let sink = MotorSink::from_config(&config).unwrap();
        assert!(matches!(sink, MotorSink::Simulated(_)));
    }
}
