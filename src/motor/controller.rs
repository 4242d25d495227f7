//! Motor controller: command path, emergency stop, safety watchdog
//!
//! # Safety model
//!
//! Two independent mechanisms keep a dead or confused control loop from
//! driving the rover away:
//!
//! - **Emergency stop**: a lock-free flag usable from any thread.
//!   [`MotorController::emergency_stop`] zeroes the outputs synchronously on
//!   the caller's thread *and* latches the flag; the watchdog re-asserts
//!   zero on its 100 ms cadence, so the outputs are zero within 100 ms even
//!   if the caller dies mid-call. Drive commands are refused until
//!   [`MotorController::clear_emergency`].
//!
//! - **Dead-man timeout**: when no command has arrived within the safety
//!   timeout, the watchdog feeds zero through the normal ramp path until
//!   the wheels settle at rest.
//!
//! The watchdog thread never panics; on a poisoned state it exits after
//! forcing the outputs down.

use super::sink::MotorSink;
use super::translator::{MotorTranslator, WheelCommand};
use crate::config::MotorConfig;
use crate::error::{Error, Result};
use crate::nav::DriveCommand;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Watchdog cadence; bounds emergency-to-zero latency
const WATCHDOG_PERIOD: Duration = Duration::from_millis(100);

struct Inner {
    translator: MotorTranslator,
    sink: MotorSink,
    last_command_at: Option<Instant>,
}

/// Serializable controller status for the external API.
#[derive(Debug, Clone, Serialize)]
pub struct MotorStatus {
    pub running: bool,
    pub emergency_active: bool,
    pub left: f64,
    pub right: f64,
    pub last_command_age_s: Option<f64>,
}

/// High-level differential drive controller.
pub struct MotorController {
    inner: Arc<Mutex<Inner>>,
    emergency: Arc<AtomicBool>,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    safety_timeout: Duration,
}

impl MotorController {
    pub fn new(config: &MotorConfig, sink: MotorSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                translator: MotorTranslator::new(config),
                sink,
                last_command_at: None,
            })),
            emergency: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            watchdog: Mutex::new(None),
            safety_timeout: Duration::from_secs_f64(config.safety_timeout_s),
        }
    }

    /// Arm the controller and spawn the watchdog thread.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("Motor controller already running");
            return Ok(());
        }
        self.shutdown.store(false, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let emergency = Arc::clone(&self.emergency);
        let shutdown = Arc::clone(&self.shutdown);
        let safety_timeout = self.safety_timeout;

        let handle = std::thread::Builder::new()
            .name("motor-watchdog".to_string())
            .spawn(move || watchdog_loop(inner, emergency, shutdown, safety_timeout))?;
        *self.watchdog.lock() = Some(handle);

        log::info!(
            "Motor controller started (dead-man {:.1} s)",
            self.safety_timeout.as_secs_f64()
        );
        Ok(())
    }

    /// Stop the watchdog and zero the outputs. Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.watchdog.lock().take() {
            let _ = handle.join();
        }

        let mut inner = self.inner.lock();
        inner.translator.reset();
        if let Err(e) = inner.sink.apply_wheels(0.0, 0.0) {
            log::debug!("Final zero on stop failed: {}", e);
        }
        log::info!("Motor controller stopped");
    }

    /// Execute a drive command through mix, normalize, ramp, and cap.
    pub fn apply(&self, command: &DriveCommand) -> Result<WheelCommand> {
        if !self.started.load(Ordering::Relaxed) {
            return Err(Error::Motor("motor controller not running".to_string()));
        }
        if self.emergency.load(Ordering::Relaxed) {
            return Err(Error::Motor("emergency stop active".to_string()));
        }

        let mut inner = self.inner.lock();
        let wheels = inner.translator.translate(command.speed, command.turn_rate);
        inner.sink.apply_wheels(wheels.left, wheels.right)?;
        inner.last_command_at = Some(Instant::now());
        log::trace!(
            "Drive ({:.2}, {:.2}) -> wheels L={:.2} R={:.2}",
            command.speed,
            command.turn_rate,
            wheels.left,
            wheels.right
        );
        Ok(wheels)
    }

    /// Direct per-wheel command (manual drive); still ramped and capped.
    pub fn apply_differential(&self, left: f64, right: f64) -> Result<WheelCommand> {
        if !self.started.load(Ordering::Relaxed) {
            return Err(Error::Motor("motor controller not running".to_string()));
        }
        if self.emergency.load(Ordering::Relaxed) {
            return Err(Error::Motor("emergency stop active".to_string()));
        }

        let mut inner = self.inner.lock();
        let wheels = inner.translator.apply_differential(left, right);
        inner.sink.apply_wheels(wheels.left, wheels.right)?;
        inner.last_command_at = Some(Instant::now());
        Ok(wheels)
    }

    /// Latch the emergency flag and zero the outputs now.
    ///
    /// Non-blocking beyond a short mutex hold; always effective within the
    /// watchdog period even under contention. Idempotent.
    pub fn emergency_stop(&self) {
        let first = !self.emergency.swap(true, Ordering::SeqCst);
        if first {
            log::warn!("EMERGENCY STOP");
        }
        let mut inner = self.inner.lock();
        if let Err(e) = inner.sink.apply_emergency_stop() {
            log::error!("Emergency zero failed: {}", e);
        }
        inner.translator.reset();
        inner.last_command_at = None;
    }

    /// Disarm the emergency latch and accept commands again.
    pub fn clear_emergency(&self) {
        if self.emergency.swap(false, Ordering::SeqCst) {
            self.inner.lock().sink.clear_emergency();
            log::info!("Emergency stop cleared");
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::Relaxed)
    }

    /// Last emitted wheel pair
    pub fn current_wheels(&self) -> WheelCommand {
        self.inner.lock().translator.current()
    }

    pub fn set_max_speed(&self, speed: f64) {
        self.inner.lock().translator.set_max_speed(speed);
    }

    pub fn status(&self) -> MotorStatus {
        let inner = self.inner.lock();
        let wheels = inner.translator.current();
        MotorStatus {
            running: self.started.load(Ordering::Relaxed),
            emergency_active: self.emergency.load(Ordering::Relaxed),
            left: wheels.left,
            right: wheels.right,
            last_command_age_s: inner.last_command_at.map(|t| t.elapsed().as_secs_f64()),
        }
    }
}

impl Drop for MotorController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watchdog loop: emergency enforcement plus the dead-man timeout.
fn watchdog_loop(
    inner: Arc<Mutex<Inner>>,
    emergency: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    safety_timeout: Duration,
) {
    log::debug!("Motor watchdog started");

    while !shutdown.load(Ordering::Relaxed) {
        if emergency.load(Ordering::Relaxed) {
            // Re-assert zero: guards against a caller that died between
            // setting the flag and zeroing the outputs
            let mut inner = inner.lock();
            if let Err(e) = inner.sink.apply_emergency_stop() {
                log::error!("Watchdog emergency zero failed: {}", e);
            }
            inner.translator.reset();
        } else {
            let mut inner = inner.lock();
            let timed_out = inner
                .last_command_at
                .is_some_and(|t| t.elapsed() > safety_timeout);
            if timed_out && !inner.translator.is_stopped() {
                // Ramp down through the normal path until settled
                let wheels = inner.translator.translate(0.0, 0.0);
                if let Err(e) = inner.sink.apply_wheels(wheels.left, wheels.right) {
                    log::error!("Watchdog ramp-down failed: {}", e);
                }
                log::warn!(
                    "Dead-man timeout, ramping down (L={:.2} R={:.2})",
                    wheels.left,
                    wheels.right
                );
            }
        }

        std::thread::sleep(WATCHDOG_PERIOD);
    }

    log::debug!("Motor watchdog exiting");
}
