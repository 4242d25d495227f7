//! Waypoint queue with cursor and loop support

use serde::Serialize;

/// Default reach tolerance, meters
pub const DEFAULT_TOLERANCE_M: f64 = 0.5;

/// A geodetic navigation target.
#[derive(Debug, Clone, Serialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    /// Reach radius in meters, strictly positive
    pub tolerance_m: f64,
    /// Optional per-waypoint speed cap, normalized 0..1
    pub speed_cap: Option<f64>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            name: None,
            tolerance_m: DEFAULT_TOLERANCE_M,
            speed_cap: None,
        }
    }

    pub fn named(lat: f64, lon: f64, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(lat, lon)
        }
    }

    pub fn with_tolerance(mut self, tolerance_m: f64) -> Self {
        self.tolerance_m = tolerance_m.max(f64::MIN_POSITIVE);
        self
    }

    pub fn with_speed_cap(mut self, cap: f64) -> Self {
        self.speed_cap = Some(cap.clamp(0.0, 1.0));
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

/// Ordered target sequence with a cursor and optional cyclic mode.
#[derive(Debug, Default)]
pub struct WaypointQueue {
    waypoints: Vec<Waypoint>,
    cursor: usize,
    loop_mode: bool,
    loop_count: u32,
}

impl WaypointQueue {
    pub fn new(loop_mode: bool) -> Self {
        Self {
            waypoints: Vec::new(),
            cursor: 0,
            loop_mode,
            loop_count: 0,
        }
    }

    /// Append a waypoint; returns its index.
    pub fn add(&mut self, waypoint: Waypoint) -> usize {
        log::info!(
            "Queued waypoint #{} '{}' at ({:.6}, {:.6})",
            self.waypoints.len() + 1,
            waypoint.display_name(),
            waypoint.lat,
            waypoint.lon
        );
        self.waypoints.push(waypoint);
        self.waypoints.len() - 1
    }

    /// Current target without moving the cursor.
    pub fn peek(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.cursor)
    }

    /// Move to the next target.
    ///
    /// In loop mode the cursor wraps to 0 past the last entry and the loop
    /// counter increments. Returns whether a target exists afterwards.
    pub fn advance(&mut self) -> bool {
        if self.cursor + 1 < self.waypoints.len() {
            self.cursor += 1;
            log::info!(
                "Advanced to waypoint {}/{}",
                self.cursor + 1,
                self.waypoints.len()
            );
            true
        } else if self.loop_mode && !self.waypoints.is_empty() {
            self.cursor = 0;
            self.loop_count += 1;
            log::info!("Loop {} complete, cycling back to first waypoint", self.loop_count);
            true
        } else {
            self.cursor = self.waypoints.len();
            false
        }
    }

    /// Empty the queue and reset cursor and loop counter.
    pub fn clear(&mut self) {
        let count = self.waypoints.len();
        self.waypoints.clear();
        self.cursor = 0;
        self.loop_count = 0;
        if count > 0 {
            log::info!("Cleared {} waypoint(s)", count);
        }
    }

    /// Remove the waypoint at `index`, fixing up the cursor.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.waypoints.len() {
            return false;
        }
        let removed = self.waypoints.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        log::info!("Removed waypoint '{}'", removed.display_name());
        true
    }

    /// Toggle loop mode; disabling mid-loop keeps the cursor where it is.
    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_mode = enabled;
        log::info!("Loop mode {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_loop(&self) -> bool {
        self.loop_mode
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Targets left until exhaustion; in loop mode, remaining within the
    /// current cycle (exhaustion never happens).
    pub fn remaining(&self) -> usize {
        self.waypoints.len().saturating_sub(self.cursor)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// All queued waypoints, for the external API.
    pub fn all(&self) -> &[Waypoint] {
        &self.waypoints
    }
}
