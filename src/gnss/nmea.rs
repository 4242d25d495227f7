//! NMEA 0183 sentence parsing and sample composition
//!
//! The receiver emits bursts of sentences once per fix. Position and quality
//! come from `GGA`; course and speed over ground come from `VTG`. The
//! [`SampleComposer`] pairs a GGA with the VTG that follows it (or gives up
//! after a short coalescing window) and emits one [`KinematicSample`] per
//! accepted position sentence.
//!
//! Heading rule: the course-over-ground field is only trustworthy while the
//! antenna is actually moving. Below [`MIN_HEADING_SPEED_MPS`] the reported
//! course is noise, so the composer carries the previously accepted heading
//! forward and marks the sample's heading as unreliable. A heading is never
//! fabricated.

use super::types::{FixQuality, GnssFix, KinematicSample};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Knots to meters per second
pub const KNOTS_TO_MPS: f64 = 0.5144444;

/// Minimum ground speed at which course-over-ground is publishable
pub const MIN_HEADING_SPEED_MPS: f64 = 0.5;

/// How long a GGA waits for its companion VTG before being emitted alone
pub const COALESCE_WINDOW: Duration = Duration::from_millis(200);

/// Sentence-level parse failures
#[derive(Error, Debug, PartialEq)]
pub enum NmeaError {
    #[error("not a framed NMEA sentence")]
    Framing,

    #[error("checksum mismatch (expected {expected:02X}, got {actual:02X})")]
    Checksum { expected: u8, actual: u8 },

    #[error("bad field: {0}")]
    BadField(&'static str),

    #[error("coordinate out of range: {0}")]
    OutOfRange(&'static str),
}

/// Counters for stream health, updated by the receiver thread
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ParserStats {
    pub accepted: u64,
    pub checksum_failures: u64,
    pub malformed: u64,
    pub rejected_out_of_range: u64,
    pub unknown_quality: u64,
    /// Liveness: 1 s windows in which the line delivered no bytes at all
    pub read_timeouts: u64,
}

/// Parsed GGA payload
#[derive(Debug, Clone)]
pub struct GgaData {
    /// The full sentence as received, for verbatim upstream to the caster
    pub raw: String,
    /// Decimal-degree position; `None` when the receiver has no fix
    pub position: Option<(f64, f64)>,
    pub quality: FixQuality,
    /// False when the quality digit was not one we recognize
    pub quality_known: bool,
    pub satellites: u32,
    pub hdop: Option<f64>,
    pub altitude_m: Option<f64>,
}

/// Parsed VTG payload
#[derive(Debug, Clone, Copy)]
pub struct VtgData {
    /// Course over ground, true north, degrees
    pub course_deg: Option<f64>,
    /// Ground speed, m/s (converted from knots)
    pub speed_mps: Option<f64>,
}

/// One classified sentence
#[derive(Debug, Clone)]
pub enum Sentence {
    Gga(GgaData),
    Vtg(VtgData),
    /// Accepted but irrelevant (RMC, GSA, GSV, ...)
    Other,
}

/// XOR checksum over the sentence body (between `$` and `*`)
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Validate framing and checksum, returning the body between `$` and `*`
fn split_frame(line: &str) -> Result<&str, NmeaError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let rest = line.strip_prefix('$').ok_or(NmeaError::Framing)?;
    let star = rest.rfind('*').ok_or(NmeaError::Framing)?;
    let (body, cs_hex) = rest.split_at(star);
    let cs_hex = &cs_hex[1..];
    if cs_hex.len() != 2 {
        return Err(NmeaError::Framing);
    }
    let expected = u8::from_str_radix(cs_hex, 16).map_err(|_| NmeaError::Framing)?;
    let actual = checksum(body);
    if actual != expected {
        return Err(NmeaError::Checksum { expected, actual });
    }
    Ok(body)
}

/// NMEA ddmm.mmmm (or dddmm.mmmm) to signed decimal degrees
fn parse_coordinate(field: &str, hemisphere: &str) -> Result<f64, NmeaError> {
    let value: f64 = field
        .parse()
        .map_err(|_| NmeaError::BadField("coordinate"))?;
    let degrees = (value / 100.0).trunc();
    let minutes = value - degrees * 100.0;
    if minutes >= 60.0 {
        return Err(NmeaError::BadField("coordinate minutes"));
    }
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Ok(decimal),
        "S" | "W" => Ok(-decimal),
        _ => Err(NmeaError::BadField("hemisphere")),
    }
}

fn parse_optional_f64(field: &str, name: &'static str) -> Result<Option<f64>, NmeaError> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|_| NmeaError::BadField(name))
}

impl Sentence {
    /// Parse one line into a classified sentence.
    ///
    /// Checksum failures and malformed fields are errors; sentence classes
    /// the core does not consume parse as [`Sentence::Other`].
    pub fn parse(line: &str) -> Result<Sentence, NmeaError> {
        let body = split_frame(line)?;
        let fields: Vec<&str> = body.split(',').collect();
        let kind = fields[0];
        if kind.len() < 5 {
            return Err(NmeaError::BadField("sentence type"));
        }
        match &kind[kind.len() - 3..] {
            "GGA" => Self::parse_gga(line, &fields),
            "VTG" => Self::parse_vtg(&fields),
            _ => Ok(Sentence::Other),
        }
    }

    fn parse_gga(line: &str, fields: &[&str]) -> Result<Sentence, NmeaError> {
        if fields.len() < 10 {
            return Err(NmeaError::BadField("GGA field count"));
        }

        let quality_digit: u8 = fields[6]
            .parse()
            .map_err(|_| NmeaError::BadField("fix quality"))?;
        let (quality, quality_known) = FixQuality::from_nmea_digit(quality_digit);

        let position = if fields[2].is_empty() || fields[4].is_empty() {
            None
        } else {
            let lat = parse_coordinate(fields[2], fields[3])?;
            let lon = parse_coordinate(fields[4], fields[5])?;
            if !(-90.0..=90.0).contains(&lat) {
                return Err(NmeaError::OutOfRange("latitude"));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(NmeaError::OutOfRange("longitude"));
            }
            Some((lat, lon))
        };

        let satellites: u32 = if fields[7].is_empty() {
            0
        } else {
            fields[7]
                .parse()
                .map_err(|_| NmeaError::BadField("satellite count"))?
        };
        let hdop = parse_optional_f64(fields[8], "hdop")?;
        if hdop.is_some_and(|h| h < 0.0) {
            return Err(NmeaError::BadField("hdop"));
        }
        let altitude_m = parse_optional_f64(fields[9], "altitude")?;

        Ok(Sentence::Gga(GgaData {
            raw: line.trim_end_matches(['\r', '\n']).to_string(),
            position,
            quality,
            quality_known,
            satellites,
            hdop,
            altitude_m,
        }))
    }

    fn parse_vtg(fields: &[&str]) -> Result<Sentence, NmeaError> {
        if fields.len() < 6 {
            return Err(NmeaError::BadField("VTG field count"));
        }
        let course_deg = parse_optional_f64(fields[1], "course")?;
        if course_deg.is_some_and(|c| !(0.0..360.0).contains(&c)) {
            return Err(NmeaError::BadField("course"));
        }
        let speed_mps = parse_optional_f64(fields[5], "speed")?.map(|kn| kn * KNOTS_TO_MPS);
        if speed_mps.is_some_and(|s| s < 0.0) {
            return Err(NmeaError::BadField("speed"));
        }
        Ok(Sentence::Vtg(VtgData {
            course_deg,
            speed_mps,
        }))
    }
}

struct PendingGga {
    data: GgaData,
    received_at: Instant,
}

/// Pairs GGA and VTG sentences into kinematic samples.
pub struct SampleComposer {
    pending: Option<PendingGga>,
    last_heading: Option<f64>,
}

impl SampleComposer {
    pub fn new() -> Self {
        Self {
            pending: None,
            last_heading: None,
        }
    }

    /// Feed one parsed sentence; may emit the sample completed by it.
    ///
    /// A GGA arriving while another GGA is still waiting for its VTG flushes
    /// the waiting one first, so every accepted position sentence produces
    /// exactly one emission.
    pub fn ingest(&mut self, sentence: Sentence, now: Instant) -> Option<KinematicSample> {
        match sentence {
            Sentence::Gga(gga) => {
                let flushed = self
                    .pending
                    .take()
                    .and_then(|p| self.compose(p.data, None, p.received_at));
                self.pending = Some(PendingGga {
                    data: gga,
                    received_at: now,
                });
                flushed
            }
            Sentence::Vtg(vtg) => {
                if let Some(p) = self.pending.take() {
                    self.compose(p.data, Some(vtg), p.received_at)
                } else {
                    // VTG without a waiting GGA still tells us the course
                    self.observe_heading(&vtg);
                    None
                }
            }
            Sentence::Other => None,
        }
    }

    /// Emit a waiting GGA whose coalescing window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<KinematicSample> {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.received_at) >= COALESCE_WINDOW)
        {
            let p = self.pending.take().unwrap();
            self.compose(p.data, None, p.received_at)
        } else {
            None
        }
    }

    fn observe_heading(&mut self, vtg: &VtgData) {
        if let (Some(course), Some(speed)) = (vtg.course_deg, vtg.speed_mps) {
            if speed >= MIN_HEADING_SPEED_MPS {
                self.last_heading = Some(course);
            }
        }
    }

    fn compose(
        &mut self,
        gga: GgaData,
        vtg: Option<VtgData>,
        received_at: Instant,
    ) -> Option<KinematicSample> {
        let (lat, lon) = gga.position?;
        if !gga.quality.has_position() {
            return None;
        }

        let speed_mps = vtg.and_then(|v| v.speed_mps);
        let course = vtg.and_then(|v| v.course_deg);

        let (heading_deg, heading_reliable) = match (course, speed_mps) {
            (Some(c), Some(s)) if s >= MIN_HEADING_SPEED_MPS => {
                self.last_heading = Some(c);
                (Some(c), true)
            }
            _ => (self.last_heading, false),
        };

        Some(KinematicSample {
            fix: GnssFix {
                lat,
                lon,
                altitude_m: gga.altitude_m,
                quality: gga.quality,
                satellites: gga.satellites,
                hdop: gga.hdop,
                received_at,
            },
            heading_deg,
            heading_reliable,
            speed_mps,
        })
    }
}

impl Default for SampleComposer {
    fn default() -> Self {
        Self::new()
    }
}
