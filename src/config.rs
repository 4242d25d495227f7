//! Configuration loading for DishaNav
//!
//! # Configuration File Format
//!
//! The configuration file is TOML-formatted with the following structure:
//!
//! ```toml
//! [receiver]
//! port = "/dev/ttyS0"
//! baud = 115200
//!
//! # Optional: omit the whole section to run GPS-only (no corrections)
//! [caster]
//! host = "caster.example.net"
//! port = 2101
//! mountpoint = "NEAR"
//! username = "user"
//! password = "pass"
//!
//! [nav]
//! max_speed = 1.0
//! waypoint_tolerance_m = 0.5
//!
//! [motor]
//! ramp_rate = 0.5
//! backend = "simulated"   # "gpio" | "simulated"
//!
//! [supervisor]
//! tick_period_ms = 500
//! ```
//!
//! Every key has a default; an absent file yields the default configuration
//! (simulated motor backend, no correction link).
//!
//! # Validation
//!
//! Safety-relevant values are validated at load time and refuse to start when
//! out of range: the realign threshold must exceed the align tolerance, the
//! ramp rate is clamped to [0.01, 1.0], speeds must lie in [0, 1], and the
//! tick period must be positive. A bad configuration is a fatal error, never
//! silently corrected (except the documented ramp clamp).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct RoverConfig {
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Correction caster settings; `None` disables the link entirely
    #[serde(default)]
    pub caster: Option<CasterConfig>,
    #[serde(default)]
    pub nav: NavConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// GNSS receiver serial line
#[derive(Clone, Debug, Deserialize)]
pub struct ReceiverConfig {
    /// Serial device path (default: /dev/ttyS0)
    #[serde(default = "default_receiver_port")]
    pub port: String,

    /// Serial line rate (default: 115200, 8N1)
    #[serde(default = "default_baud")]
    pub baud: u32,
}

/// NTRIP correction caster session
#[derive(Clone, Debug, Deserialize)]
pub struct CasterConfig {
    pub host: String,

    /// Caster TCP port (default: 2101)
    #[serde(default = "default_caster_port")]
    pub port: u16,

    pub mountpoint: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

/// Navigator tuning
#[derive(Clone, Debug, Deserialize)]
pub struct NavConfig {
    /// Forward speed cap, normalized (default: 1.0)
    #[serde(default = "default_nav_max_speed")]
    pub max_speed: f64,

    /// Heading error below which ALIGNING hands over to DRIVING (degrees)
    #[serde(default = "default_align_tolerance")]
    pub align_tolerance_deg: f64,

    /// Heading error above which DRIVING falls back to ALIGNING (degrees)
    #[serde(default = "default_realign_threshold")]
    pub realign_threshold_deg: f64,

    /// Default reach radius for waypoints without their own (meters)
    #[serde(default = "default_waypoint_tolerance")]
    pub waypoint_tolerance_m: f64,

    /// In-place turn magnitude while aligning (default: 0.4)
    #[serde(default = "default_align_speed")]
    pub align_speed: f64,

    /// Maximum time in ALIGNING before degrading to DRIVING (seconds)
    #[serde(default = "default_align_timeout")]
    pub align_timeout_s: f64,

    /// Maximum time in CALIBRATING before accepting partial data (seconds)
    #[serde(default = "default_calibration_duration")]
    pub calibration_duration_s: f64,

    /// Proportional gain for the heading correction in DRIVING
    #[serde(default = "default_drive_correction_gain")]
    pub drive_correction_gain: f64,

    /// Wrap the waypoint queue instead of completing the path
    #[serde(default)]
    pub loop_mode: bool,
}

/// Motor translator and safety settings
#[derive(Clone, Debug, Deserialize)]
pub struct MotorConfig {
    /// Maximum per-tick change of a wheel command, clamped to [0.01, 1.0]
    #[serde(default = "default_ramp_rate")]
    pub ramp_rate: f64,

    /// Weight of turn_rate in the differential mix (default: 1.0)
    #[serde(default = "default_turn_sensitivity")]
    pub turn_sensitivity: f64,

    /// Dead-man: zero the wheels when no command arrives within this window
    #[serde(default = "default_safety_timeout")]
    pub safety_timeout_s: f64,

    /// Wheel command magnitude cap (default: 0.8)
    #[serde(default = "default_motor_max_speed")]
    pub max_speed: f64,

    /// Output backend: "gpio" for hardware, "simulated" for bench runs
    #[serde(default = "default_motor_backend")]
    pub backend: String,
}

/// Control cadence and freshness windows
#[derive(Clone, Debug, Deserialize)]
pub struct SupervisorConfig {
    /// Control tick period (default: 500 ms = 2 Hz)
    #[serde(default = "default_tick_period")]
    pub tick_period_ms: u64,

    /// Position samples older than this are unusable (seconds)
    #[serde(default = "default_position_stale")]
    pub position_stale_s: f64,

    /// Receiver silence after which a stall event is raised (milliseconds)
    #[serde(default = "default_stream_stale")]
    pub stream_stale_ms: u64,
}

// Default value functions

fn default_receiver_port() -> String {
    "/dev/ttyS0".to_string()
}
fn default_baud() -> u32 {
    115200
}
fn default_caster_port() -> u16 {
    2101
}
fn default_nav_max_speed() -> f64 {
    1.0
}
fn default_align_tolerance() -> f64 {
    15.0
}
fn default_realign_threshold() -> f64 {
    30.0
}
fn default_waypoint_tolerance() -> f64 {
    0.5
}
fn default_align_speed() -> f64 {
    0.4
}
fn default_align_timeout() -> f64 {
    10.0
}
fn default_calibration_duration() -> f64 {
    5.0
}
fn default_drive_correction_gain() -> f64 {
    0.02
}
fn default_ramp_rate() -> f64 {
    0.5
}
fn default_turn_sensitivity() -> f64 {
    1.0
}
fn default_safety_timeout() -> f64 {
    0.5
}
fn default_motor_max_speed() -> f64 {
    0.8
}
fn default_motor_backend() -> String {
    "simulated".to_string()
}
fn default_tick_period() -> u64 {
    500
}
fn default_position_stale() -> f64 {
    2.0
}
fn default_stream_stale() -> u64 {
    1500
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: default_receiver_port(),
            baud: default_baud(),
        }
    }
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            max_speed: default_nav_max_speed(),
            align_tolerance_deg: default_align_tolerance(),
            realign_threshold_deg: default_realign_threshold(),
            waypoint_tolerance_m: default_waypoint_tolerance(),
            align_speed: default_align_speed(),
            align_timeout_s: default_align_timeout(),
            calibration_duration_s: default_calibration_duration(),
            drive_correction_gain: default_drive_correction_gain(),
            loop_mode: false,
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            ramp_rate: default_ramp_rate(),
            turn_sensitivity: default_turn_sensitivity(),
            safety_timeout_s: default_safety_timeout(),
            max_speed: default_motor_max_speed(),
            backend: default_motor_backend(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period(),
            position_stale_s: default_position_stale(),
            stream_stale_ms: default_stream_stale(),
        }
    }
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            caster: None,
            nav: NavConfig::default(),
            motor: MotorConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl RoverConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let mut config: RoverConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges; clamps the ramp rate, refuses everything else
    pub fn validate(&mut self) -> Result<()> {
        if self.nav.realign_threshold_deg <= self.nav.align_tolerance_deg {
            return Err(Error::Config(format!(
                "nav.realign_threshold_deg ({}) must exceed nav.align_tolerance_deg ({}), \
                otherwise DRIVING and ALIGNING oscillate every tick",
                self.nav.realign_threshold_deg, self.nav.align_tolerance_deg
            )));
        }
        if self.nav.waypoint_tolerance_m <= 0.0 {
            return Err(Error::Config(
                "nav.waypoint_tolerance_m must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.nav.max_speed) {
            return Err(Error::Config(format!(
                "nav.max_speed must be within [0, 1] (got {})",
                self.nav.max_speed
            )));
        }
        if !(0.0..=1.0).contains(&self.nav.align_speed) {
            return Err(Error::Config(format!(
                "nav.align_speed must be within [0, 1] (got {})",
                self.nav.align_speed
            )));
        }
        if self.nav.align_timeout_s <= 0.0 || self.nav.calibration_duration_s <= 0.0 {
            return Err(Error::Config(
                "nav.align_timeout_s and nav.calibration_duration_s must be positive".to_string(),
            ));
        }
        if self.nav.drive_correction_gain < 0.0 {
            return Err(Error::Config(
                "nav.drive_correction_gain must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.motor.max_speed) {
            return Err(Error::Config(format!(
                "motor.max_speed must be within [0, 1] (got {})",
                self.motor.max_speed
            )));
        }
        if self.motor.turn_sensitivity < 0.0 {
            return Err(Error::Config(
                "motor.turn_sensitivity must be non-negative".to_string(),
            ));
        }
        if self.motor.safety_timeout_s <= 0.0 {
            return Err(Error::Config(
                "motor.safety_timeout_s must be positive".to_string(),
            ));
        }
        match self.motor.backend.as_str() {
            "gpio" | "simulated" => {}
            other => {
                return Err(Error::Config(format!(
                    "motor.backend must be \"gpio\" or \"simulated\" (got \"{}\")",
                    other
                )));
            }
        }
        if self.supervisor.tick_period_ms == 0 {
            return Err(Error::Config(
                "supervisor.tick_period_ms must be positive".to_string(),
            ));
        }
        if self.supervisor.position_stale_s <= 0.0 {
            return Err(Error::Config(
                "supervisor.position_stale_s must be positive".to_string(),
            ));
        }

        // Out-of-range ramp rates jerk the drivetrain or freeze it; clamp
        // instead of refusing since both ends are still safe values.
        let clamped = self.motor.ramp_rate.clamp(0.01, 1.0);
        if (clamped - self.motor.ramp_rate).abs() > f64::EPSILON {
            log::warn!(
                "motor.ramp_rate {} outside [0.01, 1.0], clamped to {}",
                self.motor.ramp_rate,
                clamped
            );
            self.motor.ramp_rate = clamped;
        }

        Ok(())
    }

    /// Caster address string, when a caster is configured
    pub fn caster_address(&self) -> Option<String> {
        self.caster
            .as_ref()
            .map(|c| format!("{}:{}", c.host, c.port))
    }
}
