//! Session telemetry counters
//!
//! Lock-free counters updated from any thread, snapshotted by the supervisor
//! for the external status API.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Navigation session counters, shared across threads.
#[derive(Debug)]
pub struct SessionMetrics {
    started_at: Instant,
    waypoints_reached: AtomicU32,
    gps_loss_events: AtomicU32,
    navigation_errors: AtomicU32,
    emergency_stops: AtomicU32,
    stream_stalls: AtomicU32,
}

/// Serializable snapshot of [`SessionMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub waypoints_reached: u32,
    pub gps_loss_events: u32,
    pub navigation_errors: u32,
    pub emergency_stops: u32,
    pub stream_stalls: u32,
    pub session_duration_s: f64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            waypoints_reached: AtomicU32::new(0),
            gps_loss_events: AtomicU32::new(0),
            navigation_errors: AtomicU32::new(0),
            emergency_stops: AtomicU32::new(0),
            stream_stalls: AtomicU32::new(0),
        }
    }

    pub fn add_waypoint_reached(&self) {
        self.waypoints_reached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_gps_loss_event(&self) {
        self.gps_loss_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_navigation_error(&self) {
        self.navigation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_emergency_stop(&self) {
        self.emergency_stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stream_stall(&self) {
        self.stream_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            waypoints_reached: self.waypoints_reached.load(Ordering::Relaxed),
            gps_loss_events: self.gps_loss_events.load(Ordering::Relaxed),
            navigation_errors: self.navigation_errors.load(Ordering::Relaxed),
            emergency_stops: self.emergency_stops.load(Ordering::Relaxed),
            stream_stalls: self.stream_stalls.load(Ordering::Relaxed),
            session_duration_s: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
