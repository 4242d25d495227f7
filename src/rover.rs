//! Rover supervisor: the control tick and the external API
//!
//! Owns the 2 Hz control cadence. Each tick drains pending position
//! updates into the navigator, obtains one drive command, hands it to the
//! motor controller, and refreshes the health picture served to the
//! external HTTP layer.
//!
//! # Error budget
//!
//! Three consecutive ticks failing at the motor path (apply error or
//! emergency active) pause the navigator and latch a fault; `resume` is
//! explicit. A navigator reporting `ERROR` with a zero command (no
//! position, stale GPS) is *handled* degradation, not a tick failure —
//! those recover on their own when data returns.

use crate::config::RoverConfig;
use crate::error::Result;
use crate::gnss::{classify_hdop, FixQuality, KinematicSample, ParserStats, StreamEvent};
use crate::motor::{MotorController, MotorStatus};
use crate::nav::{DriveCommand, NavState, Navigator, Waypoint};
use crate::ntrip::{LinkMetrics, LinkSnapshot, LinkState};
use crate::position::PositionStore;
use crate::telemetry::{MetricsSnapshot, SessionMetrics};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive failed ticks before the navigator is paused
const FAILURE_BUDGET: u32 = 3;

/// Latest position for the external API.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: Option<f64>,
    pub fix_quality: FixQuality,
    pub rtk_status: String,
    pub satellites: u32,
    pub hdop: Option<f64>,
    pub heading_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub age_s: f64,
}

/// `get_position` response: a sample or the reason there is none.
#[derive(Debug, Clone, Serialize)]
pub struct PositionResponse {
    pub position: Option<PositionSnapshot>,
    pub error: Option<String>,
}

/// Machine-tagged condition surfaced alongside the system status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusWarning {
    pub tag: &'static str,
    pub message: String,
}

/// Composite health for `get_system_status`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub gps_connected: bool,
    pub ntrip_connected: bool,
    pub fix_quality: Option<FixQuality>,
    pub rtk_status: String,
    pub satellites: u32,
    pub hdop: Option<f64>,
    pub signal_quality: &'static str,
    pub mode: crate::nav::NavMode,
    pub stream_stalled: bool,
    pub stream: ParserStats,
    pub link: Option<LinkSnapshot>,
    pub motor: MotorStatus,
    pub fault: Option<String>,
    /// Active degradations: `link_down`, `stream_stalled`
    pub warnings: Vec<StatusWarning>,
    pub metrics: MetricsSnapshot,
}

/// The supervisor: control loop plus the transport-agnostic operations
/// consumed by the external HTTP layer.
pub struct RoverSupervisor {
    tick_period: Duration,
    position_stale: Duration,

    navigator: Mutex<Navigator>,
    motor: Arc<MotorController>,
    store: Arc<PositionStore>,
    position_rx: Receiver<()>,
    events_rx: Receiver<StreamEvent>,
    parser_stats: Arc<Mutex<ParserStats>>,
    link_metrics: Option<Arc<Mutex<LinkMetrics>>>,
    metrics: Arc<SessionMetrics>,

    /// Manual drive command waiting for the next tick (priority 2)
    manual_pending: Mutex<Option<DriveCommand>>,
    stream_stalled: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl RoverSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &RoverConfig,
        navigator: Navigator,
        motor: Arc<MotorController>,
        store: Arc<PositionStore>,
        position_rx: Receiver<()>,
        events_rx: Receiver<StreamEvent>,
        parser_stats: Arc<Mutex<ParserStats>>,
        link_metrics: Option<Arc<Mutex<LinkMetrics>>>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            tick_period: Duration::from_millis(config.supervisor.tick_period_ms),
            position_stale: Duration::from_secs_f64(config.supervisor.position_stale_s),
            navigator: Mutex::new(navigator),
            motor,
            store,
            position_rx,
            events_rx,
            parser_stats,
            link_metrics,
            metrics,
            manual_pending: Mutex::new(None),
            stream_stalled: AtomicBool::new(false),
            fault: Mutex::new(None),
        }
    }

    /// Control loop; returns when `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) {
        log::info!(
            "Supervisor started ({} ms tick)",
            self.tick_period.as_millis()
        );

        let mut failures = 0u32;
        let mut last_status = None;
        let mut last_error_tag: Option<String> = None;

        while !shutdown.load(Ordering::Relaxed) {
            let tick_start = Instant::now();

            let failed = self.tick(tick_start);
            if failed {
                failures += 1;
                if failures >= FAILURE_BUDGET {
                    self.trip_failure_budget(failures);
                    failures = 0;
                }
            } else {
                failures = 0;
            }

            // Edge-triggered session counters
            let state = self.navigator.lock().state();
            if state.status == crate::nav::NavStatus::ReachedWaypoint
                && last_status != Some(state.status)
            {
                self.metrics.add_waypoint_reached();
            }
            if state.error_tag.as_deref() == Some("stale_gps")
                && last_error_tag.as_deref() != Some("stale_gps")
            {
                self.metrics.add_gps_loss_event();
            }
            last_status = Some(state.status);
            last_error_tag = state.error_tag;

            let elapsed = tick_start.elapsed();
            if elapsed < self.tick_period {
                std::thread::sleep(self.tick_period - elapsed);
            } else {
                log::warn!("Tick overran its period ({} ms)", elapsed.as_millis());
            }
        }

        log::info!("Supervisor exiting");
        self.motor.stop();
    }

    /// One control tick. Returns whether the tick failed at the motor path.
    fn tick(&self, now: Instant) -> bool {
        // 1. Drain position updates into the navigator
        while self.position_rx.try_recv().is_ok() {}
        if let Some(sample) = self.store.latest() {
            self.navigator.lock().update_position(&sample);
        }

        for event in self.events_rx.try_iter() {
            match event {
                StreamEvent::Stalled => self.stream_stalled.store(true, Ordering::Relaxed),
                StreamEvent::Recovered => self.stream_stalled.store(false, Ordering::Relaxed),
            }
        }

        // 2. Navigator command for this tick
        let nav_command = self.navigator.lock().tick_at(now);

        // 3. Highest-priority command wins the tick
        let command = match self.manual_pending.lock().take() {
            Some(manual) if manual.priority >= nav_command.priority => manual,
            _ => nav_command,
        };

        // 4. Motor path
        match self.motor.apply(&command) {
            Ok(_) => false,
            Err(e) => {
                log::debug!("Motor apply failed: {}", e);
                true
            }
        }
    }

    fn trip_failure_budget(&self, failures: u32) {
        log::error!(
            "{} consecutive tick failures, pausing navigation",
            failures
        );
        self.navigator.lock().pause();
        self.metrics.add_navigation_error();
        *self.fault.lock() = Some(format!(
            "{} consecutive tick failures; navigation paused, resume explicitly",
            failures
        ));
    }

    // ------------------------------------------------------------------
    // Query operations (§ external API)
    // ------------------------------------------------------------------

    pub fn get_position(&self) -> PositionResponse {
        match self.store.latest() {
            Some(sample) => PositionResponse {
                position: Some(self.snapshot_of(&sample)),
                error: None,
            },
            None => PositionResponse {
                position: None,
                error: Some("no GPS position received yet".to_string()),
            },
        }
    }

    pub fn get_navigation_status(&self) -> NavState {
        self.navigator.lock().state()
    }

    pub fn get_system_status(&self) -> SystemStatus {
        let sample = self.store.latest();
        let now = Instant::now();
        let gps_connected = !self.store.is_stale(now, self.position_stale);
        let link = self
            .link_metrics
            .as_ref()
            .map(|metrics| metrics.lock().snapshot());
        let ntrip_connected = link
            .as_ref()
            .is_some_and(|l| l.state == LinkState::Streaming);

        let fix_quality = sample.as_ref().map(|s| s.fix.quality);
        let hdop = sample.as_ref().and_then(|s| s.fix.hdop);

        let stream_stalled = self.stream_stalled.load(Ordering::Relaxed);
        let mut warnings = Vec::new();
        // A configured link that is not streaming is reconnecting on its
        // own; navigation continues on whatever fix class remains usable
        if link.as_ref().is_some_and(|l| l.state != LinkState::Streaming) {
            warnings.push(StatusWarning {
                tag: "link_down",
                message: "correction link down, reconnecting with backoff".to_string(),
            });
        }
        if stream_stalled {
            warnings.push(StatusWarning {
                tag: "stream_stalled",
                message: "no valid sentence from the receiver".to_string(),
            });
        }

        SystemStatus {
            gps_connected,
            ntrip_connected,
            fix_quality,
            rtk_status: fix_quality
                .map(|q| q.label().to_string())
                .unwrap_or_else(|| "No Fix".to_string()),
            satellites: sample.as_ref().map(|s| s.fix.satellites).unwrap_or(0),
            hdop,
            signal_quality: classify_hdop(hdop),
            mode: self.navigator.lock().state().mode,
            stream_stalled,
            stream: *self.parser_stats.lock(),
            link,
            motor: self.motor.status(),
            fault: self.fault.lock().clone(),
            warnings,
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn telemetry(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.navigator.lock().waypoints()
    }

    // ------------------------------------------------------------------
    // Command operations
    // ------------------------------------------------------------------

    /// Append a waypoint to the queue; returns its index. Does not start
    /// navigation.
    pub fn add_waypoint(&self, lat: f64, lon: f64, name: Option<String>) -> usize {
        let mut waypoint = Waypoint::new(lat, lon);
        waypoint.name = name;
        self.navigator.lock().add_waypoint(waypoint, false)
    }

    pub fn remove_waypoint(&self, index: usize) -> bool {
        self.navigator.lock().remove_waypoint(index)
    }

    pub fn clear_waypoints(&self) {
        self.navigator.lock().clear_waypoints();
    }

    /// Run the queued waypoints.
    pub fn start_navigation(&self) -> bool {
        *self.fault.lock() = None;
        self.navigator.lock().start()
    }

    /// Single-target navigation; starts immediately.
    pub fn goto(&self, lat: f64, lon: f64, name: Option<String>) {
        let mut waypoint = Waypoint::new(lat, lon);
        waypoint.name = name;
        *self.fault.lock() = None;
        self.navigator.lock().set_target(waypoint);
    }

    /// Replace the queue with a path and start following it.
    pub fn follow_path(&self, waypoints: Vec<Waypoint>, loop_mode: Option<bool>) {
        *self.fault.lock() = None;
        self.navigator.lock().set_path(waypoints, loop_mode);
    }

    pub fn pause(&self) {
        self.navigator.lock().pause();
    }

    pub fn resume(&self) {
        *self.fault.lock() = None;
        self.navigator.lock().resume();
    }

    /// Cancel navigation: target cleared, queue preserved, motors stop.
    pub fn cancel(&self) {
        self.navigator.lock().stop();
    }

    pub fn set_loop_mode(&self, enabled: bool) {
        self.navigator.lock().set_loop_mode(enabled);
    }

    pub fn loop_count(&self) -> u32 {
        self.navigator.lock().loop_count()
    }

    /// Update the speed cap on both the navigator and the wheel outputs.
    pub fn set_speed(&self, speed: f64) {
        let speed = speed.clamp(0.0, 1.0);
        self.navigator.lock().set_max_speed(speed);
        self.motor.set_max_speed(speed);
    }

    /// Always accepted; overrides any other state.
    pub fn emergency_stop(&self) {
        self.motor.emergency_stop();
        self.navigator.lock().pause();
        self.metrics.add_emergency_stop();
    }

    pub fn clear_emergency(&self) {
        self.motor.clear_emergency();
        *self.fault.lock() = None;
    }

    /// Direct per-wheel control; refused while navigation is active.
    pub fn manual_drive(&self, left: f64, right: f64) -> Result<()> {
        self.ensure_manual_allowed()?;
        self.motor.apply_differential(left, right)?;
        Ok(())
    }

    /// Manual (speed, turn) control routed through the next tick with
    /// elevated priority; refused while navigation is active.
    pub fn manual_move(&self, speed: f64, turn_rate: f64) -> Result<()> {
        self.ensure_manual_allowed()?;
        let command = DriveCommand::new(speed, turn_rate, Instant::now()).with_priority(2);
        *self.manual_pending.lock() = Some(command);
        Ok(())
    }

    fn ensure_manual_allowed(&self) -> Result<()> {
        let navigator = self.navigator.lock();
        if navigator.is_running() && !navigator.is_paused() && navigator.state().target.is_some() {
            return Err(crate::error::Error::Motor(
                "manual control refused while navigating; pause or cancel first".to_string(),
            ));
        }
        Ok(())
    }

    fn snapshot_of(&self, sample: &KinematicSample) -> PositionSnapshot {
        PositionSnapshot {
            lat: sample.fix.lat,
            lon: sample.fix.lon,
            altitude_m: sample.fix.altitude_m,
            fix_quality: sample.fix.quality,
            rtk_status: sample.fix.quality.label().to_string(),
            satellites: sample.fix.satellites,
            hdop: sample.fix.hdop,
            heading_deg: sample.heading_deg,
            speed_mps: sample.speed_mps,
            age_s: sample.age(Instant::now()).as_secs_f64(),
        }
    }
}
