//! Waypoint-following phase machine
//!
//! Consumes the latest position/heading/speed and the current target, and
//! emits one normalized drive command per control tick.
//!
//! # Phases
//!
//! ```text
//!           heading unknown                 accepted
//!   IDLE ─────────────────▶ CALIBRATING ─────────────▶ ALIGNING
//!     │                          │ timeout, no samples     │ |err| < tol
//!     │ start, heading known     ▼                         ▼
//!     └────────────────────▶ (DRIVING at reduced speed) DRIVING ◀─┐
//!                                                          │      │ |err| > realign
//!                                          distance ≤ tol  │      │
//!                                                          ▼      │
//!                                                       REACHED ──┘ (next target)
//! ```
//!
//! CALIBRATING exists because a GNSS compass only works while moving: the
//! rover drives straight and collects course-over-ground samples until three
//! of them agree within 15°, or a timeout accepts whatever arrived.
//!
//! REACHED emits a zero command for exactly one tick before the queue
//! advances, so the translator begins ramping down before the next
//! alignment turn starts.

use super::geo::{
    circular_mean_deg, circular_range_deg, haversine_m, heading_error_deg, initial_bearing_deg,
};
use super::pid::PidController;
use super::waypoints::{Waypoint, WaypointQueue};
use crate::config::NavConfig;
use crate::gnss::KinematicSample;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Forward speed while calibrating the initial heading
const CALIBRATION_DRIVE_SPEED: f64 = 0.5;

/// Forward speed for degraded-mode driving (no usable heading)
const FALLBACK_DRIVE_SPEED: f64 = 0.5;

/// Calibration acceptance: minimum samples and maximum angular spread
const CALIB_MIN_SAMPLES: usize = 3;
const CALIB_MAX_RANGE_DEG: f64 = 15.0;
const CALIB_BUFFER_CAP: usize = 32;

/// Heading error at which the align turn command saturates
const ALIGN_FULL_SCALE_DEG: f64 = 90.0;

/// Clamp on the proportional heading correction while driving
const DRIVE_TURN_LIMIT: f64 = 0.2;

/// Distance milestones logged on approach, meters
const APPROACH_MILESTONES_M: [f64; 2] = [10.0, 5.0];

/// Navigation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavPhase {
    Idle,
    Calibrating,
    Aligning,
    Driving,
    Reached,
}

/// Navigation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavMode {
    Single,
    Path,
    Loop,
}

/// Externally visible navigation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavStatus {
    Idle,
    Navigating,
    ReachedWaypoint,
    PathComplete,
    Error,
    Paused,
}

/// Normalized drive command: forward speed and turn rate, both in [-1, 1]
/// (forward and right-turn positive).
#[derive(Debug, Clone, Copy)]
pub struct DriveCommand {
    pub speed: f64,
    pub turn_rate: f64,
    pub issued_at: Instant,
    /// Higher priority wins when two commands land in the same tick
    pub priority: u8,
}

impl DriveCommand {
    pub fn new(speed: f64, turn_rate: f64, issued_at: Instant) -> Self {
        Self {
            speed: speed.clamp(-1.0, 1.0),
            turn_rate: turn_rate.clamp(-1.0, 1.0),
            issued_at,
            priority: 1,
        }
    }

    pub fn stop(issued_at: Instant) -> Self {
        Self::new(0.0, 0.0, issued_at)
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_stop(&self) -> bool {
        self.speed == 0.0 && self.turn_rate == 0.0
    }
}

/// Snapshot of the navigator for the external API.
#[derive(Debug, Clone, Serialize)]
pub struct NavState {
    pub phase: NavPhase,
    pub mode: NavMode,
    pub status: NavStatus,
    pub target: Option<Waypoint>,
    pub distance_to_target_m: Option<f64>,
    pub bearing_to_target_deg: Option<f64>,
    pub current_heading_deg: Option<f64>,
    pub current_speed_mps: Option<f64>,
    pub error_tag: Option<String>,
    pub error_message: Option<String>,
    pub waypoints_remaining: usize,
    pub loop_count: u32,
}

enum Step {
    Emit(DriveCommand),
    Rerun,
}

/// The navigator state machine.
pub struct Navigator {
    config: NavConfig,
    stale_after: Duration,

    queue: WaypointQueue,
    target: Option<Waypoint>,
    mode: NavMode,
    status: NavStatus,
    phase: NavPhase,
    phase_started_at: Instant,

    running: bool,
    paused: bool,
    error_tag: Option<&'static str>,
    error_message: Option<String>,

    sample: Option<KinematicSample>,
    current_heading: Option<f64>,
    calib_samples: Vec<f64>,
    heading_pid: PidController,
    max_speed: f64,

    last_tick_at: Option<Instant>,
    milestones_hit: [bool; APPROACH_MILESTONES_M.len()],
}

impl Navigator {
    pub fn new(config: NavConfig, stale_after: Duration) -> Self {
        let heading_pid = PidController::proportional(
            config.drive_correction_gain,
            (-DRIVE_TURN_LIMIT, DRIVE_TURN_LIMIT),
        );
        let queue = WaypointQueue::new(config.loop_mode);
        let max_speed = config.max_speed;
        Self {
            config,
            stale_after,
            queue,
            target: None,
            mode: NavMode::Single,
            status: NavStatus::Idle,
            phase: NavPhase::Idle,
            phase_started_at: Instant::now(),
            running: false,
            paused: false,
            error_tag: None,
            error_message: None,
            sample: None,
            current_heading: None,
            calib_samples: Vec::new(),
            heading_pid,
            max_speed,
            last_tick_at: None,
            milestones_hit: [false; APPROACH_MILESTONES_M.len()],
        }
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Feed the latest kinematic sample.
    ///
    /// Reliable course-over-ground samples continuously refresh the working
    /// heading; while calibrating they are also collected for acceptance.
    pub fn update_position(&mut self, sample: &KinematicSample) {
        if sample.heading_reliable {
            if let Some(heading) = sample.heading_deg {
                if self.phase == NavPhase::Calibrating && self.calib_samples.len() < CALIB_BUFFER_CAP
                {
                    self.calib_samples.push(heading);
                }
                self.current_heading = Some(heading);
            }
        }
        self.sample = Some(sample.clone());
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Navigate to a single waypoint; starts immediately.
    pub fn set_target(&mut self, waypoint: Waypoint) {
        log::info!(
            "Target set: '{}' at ({:.6}, {:.6})",
            waypoint.display_name(),
            waypoint.lat,
            waypoint.lon
        );
        self.target = Some(waypoint);
        self.mode = NavMode::Single;
        self.begin_navigation();
    }

    /// Replace the queue with a path; starts immediately.
    pub fn set_path(&mut self, waypoints: Vec<Waypoint>, loop_mode: Option<bool>) {
        self.queue.clear();
        for wp in waypoints {
            self.queue.add(wp);
        }
        if let Some(enabled) = loop_mode {
            self.queue.set_loop(enabled);
        }
        self.target = self.queue.peek().cloned();
        if self.target.is_some() {
            self.mode = if self.queue.is_loop() {
                NavMode::Loop
            } else {
                NavMode::Path
            };
            log::info!("Path set with {} waypoint(s)", self.queue.len());
            self.begin_navigation();
        } else {
            self.status = NavStatus::Idle;
        }
    }

    /// Append a waypoint; optionally start navigating right away.
    ///
    /// Without `auto_start`, queued waypoints wait for an explicit
    /// [`Navigator::start`] — including after a completed path.
    pub fn add_waypoint(&mut self, waypoint: Waypoint, auto_start: bool) -> usize {
        let index = self.queue.add(waypoint);
        if auto_start && self.target.is_none() {
            self.start();
        }
        index
    }

    /// Start running queued waypoints. Returns false when already active.
    pub fn start(&mut self) -> bool {
        if self.running && !self.paused && self.target.is_some() {
            log::warn!("Navigator already running");
            return false;
        }
        if self.target.is_none() {
            self.target = self.queue.peek().cloned();
            if self.target.is_some() {
                self.mode = if self.queue.is_loop() {
                    NavMode::Loop
                } else {
                    NavMode::Path
                };
            }
        }
        if self.target.is_some() {
            self.begin_navigation();
        } else {
            self.running = true;
            self.paused = false;
            self.status = NavStatus::Idle;
        }
        log::info!("Navigator started");
        true
    }

    /// Pause: drive commands go to zero, target and phase are retained.
    pub fn pause(&mut self) {
        if self.running && !self.paused {
            self.paused = true;
            self.status = NavStatus::Paused;
            self.heading_pid.reset();
            log::info!("Navigator paused");
        }
    }

    /// Resume from pause; phase, target, heading, and loop count survive.
    pub fn resume(&mut self) {
        if self.running && self.paused {
            self.paused = false;
            self.status = if self.target.is_some() {
                NavStatus::Navigating
            } else {
                NavStatus::Idle
            };
            log::info!("Navigator resumed");
        }
    }

    /// Stop and clear the current target; the queue is preserved.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.target = None;
        self.status = NavStatus::Idle;
        self.phase = NavPhase::Idle;
        self.heading_pid.reset();
        self.calib_samples.clear();
        self.clear_error();
        log::info!("Navigator stopped");
    }

    pub fn clear_waypoints(&mut self) {
        self.queue.clear();
        self.target = None;
        self.status = NavStatus::Idle;
        self.phase = NavPhase::Idle;
    }

    pub fn remove_waypoint(&mut self, index: usize) -> bool {
        self.queue.remove(index)
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.queue.all().to_vec()
    }

    pub fn set_loop_mode(&mut self, enabled: bool) {
        self.queue.set_loop(enabled);
        if self.mode != NavMode::Single && self.target.is_some() {
            self.mode = if enabled { NavMode::Loop } else { NavMode::Path };
        }
    }

    pub fn loop_count(&self) -> u32 {
        self.queue.loop_count()
    }

    /// Update the forward speed cap, clamped to [0, 1].
    pub fn set_max_speed(&mut self, speed: f64) {
        self.max_speed = speed.clamp(0.0, 1.0);
        log::info!("Max speed set to {:.2}", self.max_speed);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // ------------------------------------------------------------------
    // Control tick
    // ------------------------------------------------------------------

    /// Advance the machine one control tick.
    pub fn tick(&mut self) -> DriveCommand {
        self.tick_at(Instant::now())
    }

    /// Advance the machine one control tick with an explicit clock, so the
    /// timeout behavior can be exercised deterministically.
    pub fn tick_at(&mut self, now: Instant) -> DriveCommand {
        // Preflight gates, in order
        if !self.running || self.paused {
            return DriveCommand::stop(now);
        }

        let Some(sample) = self.sample.clone() else {
            self.set_error("no_position", "no GPS position available");
            return DriveCommand::stop(now);
        };

        if sample.age(now) > self.stale_after {
            self.set_error("stale_gps", "GPS data too old");
            return DriveCommand::stop(now);
        }

        // Fresh data again: a stale/no-position error clears itself
        if self.status == NavStatus::Error {
            self.clear_error();
            self.status = NavStatus::Navigating;
        }

        let Some(target) = self.target.clone() else {
            self.phase = NavPhase::Idle;
            self.status = NavStatus::Idle;
            return DriveCommand::stop(now);
        };

        // Reached is checked before anything else so the transition happens
        // on the first tick inside the tolerance circle, whatever phase the
        // rover was in (the bearing to a target underneath the antenna is
        // meaningless)
        if self.phase != NavPhase::Reached {
            let position = (sample.fix.lat, sample.fix.lon);
            let distance = haversine_m(position, target.coordinates());
            if distance <= target.tolerance_m {
                log::info!(
                    "Waypoint reached: '{}' ({:.2} m from center)",
                    target.display_name(),
                    distance
                );
                self.enter_phase(NavPhase::Reached, now);
                self.status = NavStatus::ReachedWaypoint;
                return DriveCommand::stop(now);
            }
        }

        if self.current_heading.is_none() && self.phase != NavPhase::Calibrating {
            self.enter_phase(NavPhase::Calibrating, now);
        }

        let dt = self
            .last_tick_at
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .filter(|&dt| dt > 0.0)
            .unwrap_or(0.5);
        self.last_tick_at = Some(now);

        // Transitions that must produce this tick's command from the new
        // phase re-run the dispatch once
        for _ in 0..4 {
            let step = match self.phase {
                NavPhase::Idle => {
                    self.enter_phase(NavPhase::Aligning, now);
                    self.status = NavStatus::Navigating;
                    Step::Rerun
                }
                NavPhase::Calibrating => self.tick_calibrating(now),
                NavPhase::Aligning => self.tick_aligning(&sample, &target, now),
                NavPhase::Driving => self.tick_driving(&sample, &target, now, dt),
                NavPhase::Reached => self.tick_reached(now),
            };
            if let Step::Emit(cmd) = step {
                return cmd;
            }
        }

        // A re-run cycle this deep means inconsistent state; fail safe
        log::error!("Navigator phase dispatch did not settle, emitting stop");
        DriveCommand::stop(now)
    }

    fn tick_calibrating(&mut self, now: Instant) -> Step {
        self.status = NavStatus::Navigating;

        if self.calib_samples.len() >= CALIB_MIN_SAMPLES
            && circular_range_deg(&self.calib_samples) < CALIB_MAX_RANGE_DEG
        {
            let mean = circular_mean_deg(&self.calib_samples)
                .or_else(|| self.calib_samples.last().copied());
            self.current_heading = mean;
            log::info!(
                "Heading calibrated: {:.1}° from {} samples",
                mean.unwrap_or(0.0),
                self.calib_samples.len()
            );
            self.enter_phase(NavPhase::Aligning, now);
            return Step::Rerun;
        }

        let elapsed = now.saturating_duration_since(self.phase_started_at);
        if elapsed.as_secs_f64() >= self.config.calibration_duration_s {
            if self.calib_samples.is_empty() {
                log::warn!(
                    "Calibration timed out with no heading samples, \
                     driving at reduced speed until a course appears"
                );
                self.set_degraded("no_heading", "no usable heading, driving at reduced speed");
                self.enter_phase(NavPhase::Driving, now);
                return Step::Emit(DriveCommand::new(FALLBACK_DRIVE_SPEED, 0.0, now));
            }
            let mean = circular_mean_deg(&self.calib_samples)
                .or_else(|| self.calib_samples.last().copied());
            self.current_heading = mean;
            log::warn!(
                "Calibration timed out, accepting {:.1}° from {} partial sample(s)",
                mean.unwrap_or(0.0),
                self.calib_samples.len()
            );
            self.enter_phase(NavPhase::Aligning, now);
            return Step::Rerun;
        }

        Step::Emit(DriveCommand::new(CALIBRATION_DRIVE_SPEED, 0.0, now))
    }

    fn tick_aligning(
        &mut self,
        sample: &KinematicSample,
        target: &Waypoint,
        now: Instant,
    ) -> Step {
        self.status = NavStatus::Navigating;

        let Some(heading) = self.current_heading else {
            self.enter_phase(NavPhase::Calibrating, now);
            return Step::Rerun;
        };

        if self.error_tag == Some("no_heading") {
            self.clear_error();
        }

        let position = (sample.fix.lat, sample.fix.lon);
        let bearing = initial_bearing_deg(position, target.coordinates());
        let err = heading_error_deg(heading, bearing);

        if err.abs() < self.config.align_tolerance_deg {
            self.heading_pid.reset();
            self.enter_phase(NavPhase::Driving, now);
            return Step::Emit(DriveCommand::new(self.target_speed(target), 0.0, now));
        }

        let elapsed = now.saturating_duration_since(self.phase_started_at);
        if elapsed.as_secs_f64() > self.config.align_timeout_s {
            log::warn!(
                "Alignment timed out at {:.1}° error, driving at reduced speed",
                err.abs()
            );
            self.enter_phase(NavPhase::Driving, now);
            return Step::Emit(DriveCommand::new(FALLBACK_DRIVE_SPEED, 0.0, now));
        }

        let turn =
            err.signum() * (err.abs() / ALIGN_FULL_SCALE_DEG).min(1.0) * self.config.align_speed;
        Step::Emit(DriveCommand::new(0.0, turn, now))
    }

    fn tick_driving(
        &mut self,
        sample: &KinematicSample,
        target: &Waypoint,
        now: Instant,
        dt: f64,
    ) -> Step {
        self.status = NavStatus::Navigating;

        let position = (sample.fix.lat, sample.fix.lon);
        let distance = haversine_m(position, target.coordinates());

        for (i, &milestone) in APPROACH_MILESTONES_M.iter().enumerate() {
            if !self.milestones_hit[i] && distance <= milestone {
                self.milestones_hit[i] = true;
                log::info!(
                    "{:.0} m to '{}' ({:.2} m)",
                    milestone,
                    target.display_name(),
                    distance
                );
            }
        }

        let Some(heading) = self.current_heading else {
            // Last-resort straight drive; a course sample will arrive once
            // ground speed builds up
            self.set_degraded("no_heading", "no usable heading, driving at reduced speed");
            log::debug!("Driving without heading, holding course");
            return Step::Emit(DriveCommand::new(FALLBACK_DRIVE_SPEED, 0.0, now));
        };

        // Heading available again: the degradation tag no longer applies
        if self.error_tag == Some("no_heading") {
            self.clear_error();
        }

        let bearing = initial_bearing_deg(position, target.coordinates());
        let err = heading_error_deg(heading, bearing);

        if err.abs() > self.config.realign_threshold_deg {
            log::info!("Heading error {:.1}° exceeds realign threshold", err.abs());
            self.heading_pid.reset();
            self.enter_phase(NavPhase::Aligning, now);
            return Step::Rerun;
        }

        let turn = self.heading_pid.update(err, dt);
        Step::Emit(DriveCommand::new(self.target_speed(target), turn, now))
    }

    fn tick_reached(&mut self, now: Instant) -> Step {
        match self.mode {
            NavMode::Single => {
                self.target = None;
                self.enter_phase(NavPhase::Idle, now);
                self.status = NavStatus::Idle;
                Step::Emit(DriveCommand::stop(now))
            }
            NavMode::Path | NavMode::Loop => {
                if self.queue.advance() {
                    self.target = self.queue.peek().cloned();
                    self.reset_for_new_target();
                    self.enter_phase(NavPhase::Aligning, now);
                    self.status = NavStatus::Navigating;
                    Step::Rerun
                } else {
                    log::info!("Path complete");
                    self.target = None;
                    self.enter_phase(NavPhase::Idle, now);
                    self.status = NavStatus::PathComplete;
                    Step::Emit(DriveCommand::stop(now))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// Immutable snapshot of the observable state.
    pub fn state(&self) -> NavState {
        let (distance, bearing) = match (&self.sample, &self.target) {
            (Some(sample), Some(target)) => {
                let position = (sample.fix.lat, sample.fix.lon);
                (
                    Some(haversine_m(position, target.coordinates())),
                    Some(initial_bearing_deg(position, target.coordinates())),
                )
            }
            _ => (None, None),
        };

        NavState {
            phase: self.phase,
            mode: self.mode,
            status: self.status,
            target: self.target.clone(),
            distance_to_target_m: distance,
            bearing_to_target_deg: bearing,
            current_heading_deg: self.current_heading,
            current_speed_mps: self.sample.as_ref().and_then(|s| s.speed_mps),
            error_tag: self.error_tag.map(str::to_string),
            error_message: self.error_message.clone(),
            waypoints_remaining: self.queue.remaining(),
            loop_count: self.queue.loop_count(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_navigation(&mut self) {
        self.running = true;
        self.paused = false;
        self.clear_error();
        self.reset_for_new_target();
        self.status = NavStatus::Navigating;
        self.enter_phase(NavPhase::Aligning, Instant::now());
    }

    fn reset_for_new_target(&mut self) {
        self.heading_pid.reset();
        self.milestones_hit = [false; APPROACH_MILESTONES_M.len()];
    }

    fn enter_phase(&mut self, phase: NavPhase, now: Instant) {
        if self.phase != phase {
            log::debug!("Phase {:?} -> {:?}", self.phase, phase);
        }
        if phase == NavPhase::Calibrating {
            self.calib_samples.clear();
        }
        self.phase = phase;
        self.phase_started_at = now;
    }

    fn set_error(&mut self, tag: &'static str, message: &str) {
        if self.error_tag != Some(tag) {
            log::warn!("Navigation error [{}]: {}", tag, message);
        }
        self.status = NavStatus::Error;
        self.error_tag = Some(tag);
        self.error_message = Some(message.to_string());
    }

    /// Record a degradation tag without halting: status stays as-is and
    /// control continues (heading missing, reduced-speed fallback).
    fn set_degraded(&mut self, tag: &'static str, message: &str) {
        if self.error_tag != Some(tag) {
            log::warn!("Navigation degraded [{}]: {}", tag, message);
        }
        self.error_tag = Some(tag);
        self.error_message = Some(message.to_string());
    }

    fn clear_error(&mut self) {
        self.error_tag = None;
        self.error_message = None;
    }

    fn target_speed(&self, target: &Waypoint) -> f64 {
        match target.speed_cap {
            Some(cap) => self.max_speed.min(cap),
            None => self.max_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss::{FixQuality, GnssFix};
    use approx::assert_relative_eq;

    fn nav_config() -> NavConfig {
        NavConfig::default()
    }

    fn sample(
        lat: f64,
        lon: f64,
        heading: Option<f64>,
        speed: f64,
        at: Instant,
    ) -> KinematicSample {
        KinematicSample {
            fix: GnssFix {
                lat,
                lon,
                altitude_m: Some(100.0),
                quality: FixQuality::RtkFixed,
                satellites: 12,
                hdop: Some(0.8),
                received_at: at,
            },
            heading_deg: heading,
            heading_reliable: heading.is_some(),
            speed_mps: Some(speed),
        }
    }

    fn navigator() -> Navigator {
        Navigator::new(nav_config(), Duration::from_secs(2))
    }

    const START: (f64, f64) = (52.237049, 21.017532);

    #[test]
    fn test_idle_without_start() {
        let mut nav = navigator();
        let cmd = nav.tick_at(Instant::now());
        assert!(cmd.is_stop());
        assert_eq!(nav.state().status, NavStatus::Idle);
    }

    #[test]
    fn test_no_position_is_error() {
        let mut nav = navigator();
        nav.set_target(Waypoint::new(START.0, START.1));
        let cmd = nav.tick_at(Instant::now());
        assert!(cmd.is_stop());

        let state = nav.state();
        assert_eq!(state.status, NavStatus::Error);
        assert_eq!(state.error_tag.as_deref(), Some("no_position"));
    }

    #[test]
    fn test_stale_position_is_error_and_recovers() {
        let mut nav = navigator();
        let t0 = Instant::now();
        nav.set_target(Waypoint::new(52.2372, 21.0178));
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));

        // Fresh: navigating
        assert!(!nav.tick_at(t0 + Duration::from_millis(500)).is_stop());

        // 3 s later the sample is stale
        let cmd = nav.tick_at(t0 + Duration::from_secs(3));
        assert!(cmd.is_stop());
        assert_eq!(nav.state().error_tag.as_deref(), Some("stale_gps"));
        let phase_before = nav.state().phase;

        // A fresh sample resumes without losing target or phase
        nav.update_position(&sample(
            START.0,
            START.1,
            Some(90.0),
            0.7,
            t0 + Duration::from_secs(4),
        ));
        let cmd = nav.tick_at(t0 + Duration::from_secs(4));
        assert!(!cmd.is_stop());
        let state = nav.state();
        assert_eq!(state.status, NavStatus::Navigating);
        assert_eq!(state.phase, phase_before);
        assert!(state.target.is_some());
    }

    #[test]
    fn test_unknown_heading_enters_calibrating() {
        let mut nav = navigator();
        let t0 = Instant::now();
        nav.set_target(Waypoint::new(52.2372, 21.0178));
        nav.update_position(&sample(START.0, START.1, None, 0.2, t0));

        let cmd = nav.tick_at(t0);
        assert_eq!(nav.state().phase, NavPhase::Calibrating);
        // Calibration drives straight
        assert_relative_eq!(cmd.speed, 0.5);
        assert_relative_eq!(cmd.turn_rate, 0.0);
    }

    #[test]
    fn test_calibration_accepts_three_tight_samples() {
        let mut nav = navigator();
        let t0 = Instant::now();
        // Target due east so a ~90° heading is already aligned
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, None, 0.2, t0));
        nav.tick_at(t0);
        assert_eq!(nav.state().phase, NavPhase::Calibrating);

        for (i, h) in [89.0, 90.0, 91.0].iter().enumerate() {
            let at = t0 + Duration::from_millis(200 * (i as u64 + 1));
            nav.update_position(&sample(START.0, START.1, Some(*h), 0.7, at));
        }

        let cmd = nav.tick_at(t0 + Duration::from_secs(1));
        // Calibrated heading ≈ 90°, bearing ≈ 90°: straight to DRIVING
        assert_eq!(nav.state().phase, NavPhase::Driving);
        assert!(cmd.speed > 0.0);
        let heading = nav.state().current_heading_deg.unwrap();
        assert_relative_eq!(heading, 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_calibration_rejects_scattered_samples() {
        let mut nav = navigator();
        let t0 = Instant::now();
        nav.set_target(Waypoint::new(52.2372, 21.0178));
        nav.update_position(&sample(START.0, START.1, None, 0.2, t0));
        nav.tick_at(t0);

        for (i, h) in [10.0, 90.0, 170.0].iter().enumerate() {
            let at = t0 + Duration::from_millis(200 * (i as u64 + 1));
            nav.update_position(&sample(START.0, START.1, Some(*h), 0.7, at));
        }

        nav.tick_at(t0 + Duration::from_secs(1));
        // 160° spread: stays calibrating
        assert_eq!(nav.state().phase, NavPhase::Calibrating);
    }

    #[test]
    fn test_calibration_timeout_accepts_partial_samples() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = crate::nav::geo::destination_point(START, 91.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, None, 0.2, t0));
        nav.tick_at(t0);

        // Only two samples ever arrive
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0 + Duration::from_secs(1)));
        nav.update_position(&sample(START.0, START.1, Some(92.0), 0.7, t0 + Duration::from_secs(2)));

        nav.tick_at(t0 + Duration::from_secs(3));
        assert_eq!(nav.state().phase, NavPhase::Calibrating);

        // At the 5 s timeout the partial mean is accepted
        nav.update_position(&sample(START.0, START.1, None, 0.2, t0 + Duration::from_secs(5)));
        nav.tick_at(t0 + Duration::from_millis(5200));
        let heading = nav.state().current_heading_deg.unwrap();
        assert_relative_eq!(heading, 91.0, epsilon = 0.1);
        assert_ne!(nav.state().phase, NavPhase::Calibrating);
    }

    #[test]
    fn test_calibration_timeout_without_samples_degrades_to_driving() {
        let mut nav = navigator();
        let t0 = Instant::now();
        nav.set_target(Waypoint::new(52.2372, 21.0178));
        nav.update_position(&sample(START.0, START.1, None, 0.2, t0));
        nav.tick_at(t0);

        nav.update_position(&sample(START.0, START.1, None, 0.2, t0 + Duration::from_secs(5)));
        let cmd = nav.tick_at(t0 + Duration::from_millis(5200));
        assert_eq!(nav.state().phase, NavPhase::Driving);
        assert_relative_eq!(cmd.speed, FALLBACK_DRIVE_SPEED);

        // Degraded, not halted: the tag is visible but control continues
        let state = nav.state();
        assert_eq!(state.status, NavStatus::Navigating);
        assert_eq!(state.error_tag.as_deref(), Some("no_heading"));

        // A course sample clears the degradation
        nav.update_position(&sample(
            START.0,
            START.1,
            Some(47.0),
            0.7,
            t0 + Duration::from_millis(5500),
        ));
        nav.tick_at(t0 + Duration::from_millis(5700));
        assert!(nav.state().error_tag.is_none());
    }

    #[test]
    fn test_aligning_turns_toward_target() {
        let mut nav = navigator();
        let t0 = Instant::now();
        // Target due east; rover facing north → +90° error, right turn
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, Some(0.0), 0.7, t0));

        let cmd = nav.tick_at(t0);
        assert_eq!(nav.state().phase, NavPhase::Aligning);
        assert_relative_eq!(cmd.speed, 0.0);
        // err = 90 → full-scale right turn at align_speed
        assert_relative_eq!(cmd.turn_rate, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_aligning_hands_over_when_aligned() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, Some(85.0), 0.7, t0));

        let cmd = nav.tick_at(t0);
        // 5° error is inside the 15° tolerance
        assert_eq!(nav.state().phase, NavPhase::Driving);
        assert_relative_eq!(cmd.speed, 1.0);
        assert_relative_eq!(cmd.turn_rate, 0.0);
    }

    #[test]
    fn test_align_timeout_degrades_to_driving() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        // Facing opposite; alignment would take a while
        nav.update_position(&sample(START.0, START.1, Some(270.0), 0.7, t0));
        nav.tick_at(t0);
        assert_eq!(nav.state().phase, NavPhase::Aligning);

        nav.update_position(&sample(START.0, START.1, Some(270.0), 0.7, t0 + Duration::from_secs(10)));
        let cmd = nav.tick_at(t0 + Duration::from_millis(10_500));
        assert_eq!(nav.state().phase, NavPhase::Driving);
        assert_relative_eq!(cmd.speed, FALLBACK_DRIVE_SPEED);
    }

    #[test]
    fn test_driving_applies_proportional_correction() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));
        nav.tick_at(t0);
        assert_eq!(nav.state().phase, NavPhase::Driving);

        // Drift 10° left of the bearing → small right correction
        nav.update_position(&sample(START.0, START.1, Some(80.0), 0.7, t0 + Duration::from_millis(400)));
        let cmd = nav.tick_at(t0 + Duration::from_millis(500));
        assert_eq!(nav.state().phase, NavPhase::Driving);
        assert_relative_eq!(cmd.turn_rate, 10.0 * 0.02, epsilon = 1e-9);
        assert!(cmd.turn_rate <= DRIVE_TURN_LIMIT);
    }

    #[test]
    fn test_driving_realigns_on_large_error() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));
        nav.tick_at(t0);
        assert_eq!(nav.state().phase, NavPhase::Driving);

        // 45° error exceeds the 30° realign threshold
        nav.update_position(&sample(START.0, START.1, Some(45.0), 0.7, t0 + Duration::from_millis(400)));
        let cmd = nav.tick_at(t0 + Duration::from_millis(500));
        assert_eq!(nav.state().phase, NavPhase::Aligning);
        // Rotating in place
        assert_relative_eq!(cmd.speed, 0.0);
        assert!(cmd.turn_rate > 0.0);
    }

    #[test]
    fn test_reached_single_target() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = Waypoint::new(START.0, START.1);
        nav.set_target(target);
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));

        // Standing on the target: REACHED, one stop tick
        let cmd = nav.tick_at(t0);
        assert!(cmd.is_stop());
        assert_eq!(nav.state().status, NavStatus::ReachedWaypoint);
        assert_eq!(nav.state().phase, NavPhase::Reached);

        // Next tick: single mode goes idle
        let cmd = nav.tick_at(t0 + Duration::from_millis(500));
        assert!(cmd.is_stop());
        assert_eq!(nav.state().status, NavStatus::Idle);
        assert_eq!(nav.state().phase, NavPhase::Idle);
        assert!(nav.state().target.is_none());
    }

    #[test]
    fn test_path_advances_through_waypoints() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let second = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_path(
            vec![
                Waypoint::named(START.0, START.1, "A"),
                Waypoint::named(second.0, second.1, "B"),
            ],
            None,
        );
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));

        // On top of A: reached
        nav.tick_at(t0);
        assert_eq!(nav.state().status, NavStatus::ReachedWaypoint);

        // Next tick advances to B and aligns/drives toward it
        nav.tick_at(t0 + Duration::from_millis(500));
        let state = nav.state();
        assert_eq!(state.status, NavStatus::Navigating);
        assert_eq!(state.target.as_ref().unwrap().display_name(), "B");
    }

    #[test]
    fn test_path_complete_without_loop() {
        let mut nav = navigator();
        let t0 = Instant::now();
        nav.set_path(vec![Waypoint::named(START.0, START.1, "only")], None);
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));

        nav.tick_at(t0);
        let cmd = nav.tick_at(t0 + Duration::from_millis(500));
        assert!(cmd.is_stop());
        assert_eq!(nav.state().status, NavStatus::PathComplete);
        assert_eq!(nav.state().phase, NavPhase::Idle);
    }

    #[test]
    fn test_pause_resume_preserves_state() {
        let mut nav = navigator();
        let t0 = Instant::now();
        let target = crate::nav::geo::destination_point(START, 90.0, 27.0);
        nav.set_target(Waypoint::new(target.0, target.1));
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));
        nav.tick_at(t0);

        let before = nav.state();
        nav.pause();
        assert_eq!(nav.state().status, NavStatus::Paused);
        assert!(nav.tick_at(t0 + Duration::from_millis(500)).is_stop());

        nav.resume();
        let after = nav.state();
        assert_eq!(after.phase, before.phase);
        assert_eq!(
            after.target.as_ref().map(|t| t.coordinates()),
            before.target.as_ref().map(|t| t.coordinates())
        );
        assert_eq!(after.current_heading_deg, before.current_heading_deg);
        assert_eq!(after.loop_count, before.loop_count);
    }

    #[test]
    fn test_stop_clears_target_keeps_queue() {
        let mut nav = navigator();
        nav.add_waypoint(Waypoint::new(52.0, 21.0), false);
        nav.add_waypoint(Waypoint::new(52.1, 21.0), false);
        nav.start();
        nav.stop();

        let state = nav.state();
        assert!(state.target.is_none());
        assert_eq!(state.phase, NavPhase::Idle);
        assert_eq!(state.waypoints_remaining, 2);

        // Idempotent
        nav.stop();
        assert_eq!(nav.state().status, NavStatus::Idle);
    }

    #[test]
    fn test_add_waypoint_does_not_auto_resume() {
        let mut nav = navigator();
        let t0 = Instant::now();
        nav.set_path(vec![Waypoint::named(START.0, START.1, "done")], None);
        nav.update_position(&sample(START.0, START.1, Some(90.0), 0.7, t0));
        nav.tick_at(t0);
        nav.tick_at(t0 + Duration::from_millis(500));
        assert_eq!(nav.state().status, NavStatus::PathComplete);

        nav.add_waypoint(Waypoint::new(52.3, 21.0), false);
        nav.tick_at(t0 + Duration::from_secs(1));
        assert_eq!(nav.state().status, NavStatus::Idle);
        assert!(nav.state().target.is_none());

        // Explicit start picks it up
        nav.start();
        assert!(nav.state().target.is_some());
    }
}
