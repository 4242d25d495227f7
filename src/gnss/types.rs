//! GNSS data structures

use serde::Serialize;
use std::time::Instant;

/// Position fix quality reported by the receiver.
///
/// Ordered by accuracy class: `NoFix < GpsSingle < Dgps < RtkFloat < RtkFixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FixQuality {
    NoFix,
    GpsSingle,
    Dgps,
    RtkFloat,
    RtkFixed,
}

impl FixQuality {
    /// Map the NMEA GGA quality digit.
    ///
    /// Returns the quality and whether the digit was a known value; unknown
    /// digits degrade to `GpsSingle` so an odd receiver firmware does not
    /// halt navigation.
    pub fn from_nmea_digit(digit: u8) -> (Self, bool) {
        match digit {
            0 => (FixQuality::NoFix, true),
            1 => (FixQuality::GpsSingle, true),
            2 => (FixQuality::Dgps, true),
            4 => (FixQuality::RtkFixed, true),
            5 => (FixQuality::RtkFloat, true),
            _ => (FixQuality::GpsSingle, false),
        }
    }

    /// Human-readable label used in status output
    pub fn label(&self) -> &'static str {
        match self {
            FixQuality::NoFix => "No Fix",
            FixQuality::GpsSingle => "Single",
            FixQuality::Dgps => "DGPS",
            FixQuality::RtkFloat => "RTK Float",
            FixQuality::RtkFixed => "RTK Fixed",
        }
    }

    /// Whether this quality carries a usable position at all
    pub fn has_position(&self) -> bool {
        !matches!(self, FixQuality::NoFix)
    }
}

/// One accepted position fix.
#[derive(Debug, Clone)]
pub struct GnssFix {
    /// WGS-84 latitude, signed decimal degrees, in [-90, 90]
    pub lat: f64,
    /// WGS-84 longitude, signed decimal degrees, in [-180, 180]
    pub lon: f64,
    /// Altitude above mean sea level, meters
    pub altitude_m: Option<f64>,
    pub quality: FixQuality,
    pub satellites: u32,
    /// Horizontal dilution of precision; `None` when the receiver omits it
    pub hdop: Option<f64>,
    /// Monotonic reception timestamp
    pub received_at: Instant,
}

/// A fix plus course and speed over ground.
#[derive(Debug, Clone)]
pub struct KinematicSample {
    pub fix: GnssFix,
    /// Course over ground, degrees clockwise from true north in [0, 360)
    pub heading_deg: Option<f64>,
    /// False when the heading was carried over from an earlier sample
    /// because the rover was moving too slowly for the receiver's course
    /// to mean anything
    pub heading_reliable: bool,
    /// Ground speed, m/s
    pub speed_mps: Option<f64>,
}

impl KinematicSample {
    /// Age of this sample relative to `now`
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.fix.received_at)
    }
}

/// HDOP classification for status reporting (good < 2.0 <= fair < 5.0 <= poor)
pub fn classify_hdop(hdop: Option<f64>) -> &'static str {
    match hdop {
        Some(h) if h < 2.0 => "good",
        Some(h) if h < 5.0 => "fair",
        Some(_) => "poor",
        None => "unknown",
    }
}
