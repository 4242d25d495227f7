//! End-to-end navigation scenarios
//!
//! A small kinematic simulator integrates the navigator's drive commands
//! into position and heading at the 2 Hz control cadence and feeds the
//! resulting samples back, so the full phase machine runs against closed
//! loop dynamics without hardware.
//!
//! Run with: `cargo test --test navigation_scenarios`

use disha_nav::config::NavConfig;
use disha_nav::gnss::{FixQuality, GnssFix, KinematicSample};
use disha_nav::nav::geo::{destination_point, haversine_m};
use disha_nav::nav::{DriveCommand, NavPhase, NavStatus, Navigator, Waypoint};
use std::time::{Duration, Instant};

// ============================================================================
// Simulator
// ============================================================================

/// Control cadence
const TICK: Duration = Duration::from_millis(500);

/// Ground speed at full drive command, m/s
const FULL_SPEED_MPS: f64 = 1.4;

/// Yaw rate at full turn command, deg/s
const FULL_TURN_DEG_PER_S: f64 = 90.0;

/// Closed-loop rover simulation around a [`Navigator`].
struct SimRover {
    nav: Navigator,
    lat: f64,
    lon: f64,
    heading: f64,
    ground_speed: f64,
    now: Instant,
    ticks: u32,
}

impl SimRover {
    fn new(lat: f64, lon: f64, heading: f64) -> Self {
        Self::with_config(lat, lon, heading, NavConfig::default())
    }

    fn with_config(lat: f64, lon: f64, heading: f64, config: NavConfig) -> Self {
        Self {
            nav: Navigator::new(config, Duration::from_secs(2)),
            lat,
            lon,
            heading,
            ground_speed: 0.7,
            now: Instant::now(),
            ticks: 0,
        }
    }

    fn sample(&self) -> KinematicSample {
        KinematicSample {
            fix: GnssFix {
                lat: self.lat,
                lon: self.lon,
                altitude_m: Some(100.0),
                quality: FixQuality::RtkFixed,
                satellites: 12,
                hdop: Some(0.8),
                received_at: self.now,
            },
            heading_deg: Some(self.heading),
            heading_reliable: true,
            speed_mps: Some(self.ground_speed.max(0.7)),
        }
    }

    fn feed_position(&mut self) {
        let sample = self.sample();
        self.nav.update_position(&sample);
    }

    /// One control tick: feed the position, run the navigator, integrate
    /// the command into the pose.
    fn step(&mut self) -> DriveCommand {
        self.feed_position();
        self.step_without_feed()
    }

    /// One tick during a GPS outage: no sample reaches the navigator.
    fn step_without_feed(&mut self) -> DriveCommand {
        let cmd = self.nav.tick_at(self.now);

        self.heading = (self.heading
            + cmd.turn_rate * FULL_TURN_DEG_PER_S * TICK.as_secs_f64())
        .rem_euclid(360.0);

        self.ground_speed = cmd.speed.abs() * FULL_SPEED_MPS;
        let distance = cmd.speed * FULL_SPEED_MPS * TICK.as_secs_f64();
        if distance.abs() > 0.0 {
            let (lat, lon) = destination_point((self.lat, self.lon), self.heading, distance);
            self.lat = lat;
            self.lon = lon;
        }

        self.now += TICK;
        self.ticks += 1;
        cmd
    }

    fn run_until<F: Fn(&Navigator) -> bool>(&mut self, predicate: F, max_ticks: u32) -> bool {
        for _ in 0..max_ticks {
            self.step();
            if predicate(&self.nav) {
                return true;
            }
        }
        false
    }

    fn distance_to(&self, point: (f64, f64)) -> f64 {
        haversine_m((self.lat, self.lon), point)
    }
}

const START: (f64, f64) = (52.237049, 21.017532);

// ============================================================================
// S1: Happy path, single waypoint
// ============================================================================

#[test]
fn s1_happy_path_single_waypoint() {
    let mut sim = SimRover::new(START.0, START.1, 90.0);
    // ≈ 27 m due east
    let target = destination_point(START, 90.0, 27.0);
    sim.nav.set_target(Waypoint::named(target.0, target.1, "east-27m"));

    // First tick: already pointing at the target, ALIGNING hands straight
    // over to DRIVING
    let cmd = sim.step();
    assert_eq!(sim.nav.state().phase, NavPhase::Driving);
    assert!(cmd.speed > 0.0);
    assert_eq!(cmd.turn_rate, 0.0);

    // DRIVING corrections stay within the proportional clamp
    for _ in 0..5 {
        let cmd = sim.step();
        if sim.nav.state().phase == NavPhase::Driving {
            assert!(cmd.turn_rate.abs() <= 0.2);
        }
    }

    // Reached within ≈ 40 ticks at 2 Hz, terminal state IDLE
    assert!(sim.run_until(
        |nav| nav.state().status == NavStatus::ReachedWaypoint,
        40
    ));
    assert!(sim.distance_to(target) < 1.0);

    sim.step();
    let state = sim.nav.state();
    assert_eq!(state.status, NavStatus::Idle);
    assert_eq!(state.phase, NavPhase::Idle);
    assert!(state.target.is_none());
}

// ============================================================================
// S2: Stale GPS mid-run
// ============================================================================

#[test]
fn s2_stale_gps_mid_run_recovers() {
    let mut sim = SimRover::new(START.0, START.1, 90.0);
    let target = destination_point(START, 90.0, 27.0);
    sim.nav.set_target(Waypoint::new(target.0, target.1));

    // Drive normally for 10 ticks
    for _ in 0..10 {
        sim.step();
    }
    assert_eq!(sim.nav.state().phase, NavPhase::Driving);

    // GPS outage: 3 s without samples (6 ticks). The rover coasts zero
    // commands after the 2 s staleness window expires.
    let mut saw_error = false;
    for _ in 0..6 {
        let cmd = sim.step_without_feed();
        let state = sim.nav.state();
        if state.status == NavStatus::Error {
            assert_eq!(state.error_tag.as_deref(), Some("stale_gps"));
            assert_eq!(cmd.speed, 0.0);
            assert_eq!(cmd.turn_rate, 0.0);
            saw_error = true;
        }
    }
    assert!(saw_error, "staleness should have tripped within the outage");

    // Samples resume: navigation continues toward the same target
    let cmd = sim.step();
    let state = sim.nav.state();
    assert_eq!(state.status, NavStatus::Navigating);
    assert!(state.target.is_some());
    assert!(!cmd.is_stop());

    assert!(sim.run_until(
        |nav| nav.state().status == NavStatus::ReachedWaypoint,
        60
    ));
}

// ============================================================================
// S3: Re-align on perturbation
// ============================================================================

#[test]
fn s3_realign_on_heading_perturbation() {
    let mut sim = SimRover::new(START.0, START.1, 90.0);
    let target = destination_point(START, 90.0, 60.0);
    sim.nav.set_target(Waypoint::new(target.0, target.1));

    for _ in 0..10 {
        sim.step();
    }
    assert_eq!(sim.nav.state().phase, NavPhase::Driving);

    // Kick the heading 45° off the bearing
    sim.heading = (sim.heading + 45.0).rem_euclid(360.0);
    let cmd = sim.step();
    assert_eq!(sim.nav.state().phase, NavPhase::Aligning);
    // Rotating in place: no forward speed
    assert_eq!(cmd.speed, 0.0);
    assert!(cmd.turn_rate.abs() > 0.0);

    // Back in DRIVING within the 10 s alignment budget (20 ticks)
    let mut aligned_within_budget = false;
    for _ in 0..20 {
        sim.step();
        if sim.nav.state().phase == NavPhase::Driving {
            aligned_within_budget = true;
            break;
        }
    }
    assert!(aligned_within_budget);

    assert!(sim.run_until(
        |nav| nav.state().status == NavStatus::ReachedWaypoint,
        120
    ));
}

// ============================================================================
// S4: Loop-mode patrol
// ============================================================================

#[test]
fn s4_loop_mode_patrol() {
    let mut sim = SimRover::new(START.0, START.1, 0.0);

    // A 10 m square: A north-east of start, then clockwise
    let a = destination_point(START, 0.0, 10.0);
    let b = destination_point(a, 90.0, 10.0);
    let c = destination_point(b, 180.0, 10.0);
    let d = destination_point(c, 270.0, 10.0);
    let corners = [
        Waypoint::named(a.0, a.1, "A"),
        Waypoint::named(b.0, b.1, "B"),
        Waypoint::named(c.0, c.1, "C"),
        Waypoint::named(d.0, d.1, "D"),
    ];
    sim.nav.set_path(corners.to_vec(), Some(true));

    // One full cycle: after reaching D, the target wraps to A
    assert!(
        sim.run_until(|nav| nav.loop_count() == 1, 600),
        "first patrol cycle did not complete"
    );
    let state = sim.nav.state();
    assert_eq!(
        state.target.as_ref().map(|t| t.display_name().to_string()),
        Some("A".to_string())
    );
    assert_eq!(state.status, NavStatus::Navigating);

    // Second cycle increments again
    assert!(
        sim.run_until(|nav| nav.loop_count() == 2, 600),
        "second patrol cycle did not complete"
    );
}

// ============================================================================
// S6: Calibration timeout with partial data
// ============================================================================

#[test]
fn s6_calibration_timeout_with_partial_samples() {
    let mut sim = SimRover::new(START.0, START.1, 91.0);
    let target = destination_point(START, 91.0, 30.0);
    sim.nav.set_target(Waypoint::new(target.0, target.1));

    let t0 = sim.now;

    // Heading unknown at start: feed two reliable samples early, then only
    // unreliable ones
    let mut unknown = sim.sample();
    unknown.heading_deg = None;
    unknown.heading_reliable = false;
    sim.nav.update_position(&unknown);
    sim.nav.tick_at(t0);
    assert_eq!(sim.nav.state().phase, NavPhase::Calibrating);

    for (i, h) in [90.0, 92.0].iter().enumerate() {
        let mut s = sim.sample();
        s.fix.received_at = t0 + Duration::from_millis(500 * (i as u64 + 1));
        s.heading_deg = Some(*h);
        s.heading_reliable = true;
        sim.nav.update_position(&s);
    }
    sim.nav.tick_at(t0 + Duration::from_secs(2));
    assert_eq!(sim.nav.state().phase, NavPhase::Calibrating);

    // At the 5 s timeout the partial samples are accepted as ≈ 91°
    let mut s = sim.sample();
    s.fix.received_at = t0 + Duration::from_secs(5);
    s.heading_deg = None;
    s.heading_reliable = false;
    sim.nav.update_position(&s);
    sim.nav.tick_at(t0 + Duration::from_millis(5100));

    let heading = sim.nav.state().current_heading_deg.unwrap();
    assert!((heading - 91.0).abs() < 0.1, "heading was {}", heading);
    assert_ne!(sim.nav.state().phase, NavPhase::Calibrating);
}

// ============================================================================
// Boundary: reach tolerance edge
// ============================================================================

#[test]
fn reached_fires_on_first_tick_within_tolerance() {
    let mut sim = SimRover::new(START.0, START.1, 90.0);
    // 0.4 m away with the default 0.5 m tolerance: reached immediately
    let target = destination_point(START, 90.0, 0.4);
    sim.nav.set_target(Waypoint::new(target.0, target.1));

    sim.step();
    assert_eq!(sim.nav.state().status, NavStatus::ReachedWaypoint);
}

#[test]
fn pause_resume_keeps_loop_progress() {
    let mut sim = SimRover::new(START.0, START.1, 0.0);
    let a = destination_point(START, 0.0, 5.0);
    let b = destination_point(a, 90.0, 5.0);
    sim.nav.set_path(
        vec![Waypoint::named(a.0, a.1, "A"), Waypoint::named(b.0, b.1, "B")],
        Some(true),
    );

    assert!(sim.run_until(|nav| nav.loop_count() == 1, 300));

    sim.nav.pause();
    let before = sim.nav.state();
    for _ in 0..4 {
        assert!(sim.step().is_stop());
    }
    sim.nav.resume();
    let after = sim.nav.state();

    assert_eq!(after.loop_count, before.loop_count);
    assert_eq!(
        after.target.as_ref().map(|t| t.coordinates()),
        before.target.as_ref().map(|t| t.coordinates())
    );
}
