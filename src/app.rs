//! Application orchestration for the DishaNav daemon
//!
//! Builds the component graph, spawns the I/O threads, runs the supervisor
//! loop on the calling thread, and tears everything down on shutdown.
//!
//! Thread layout:
//! - `gnss-receiver`: serial reader + correction forwarder (blocking I/O)
//! - `ntrip-link`: caster session with reconnect (blocking I/O, optional)
//! - `motor-watchdog`: emergency and dead-man enforcement (spawned by the
//!   motor controller)
//! - main thread: the supervisor control tick

use crate::config::RoverConfig;
use crate::error::{Error, Result};
use crate::gnss::{ParserStats, ReceiverThread};
use crate::motor::{MotorController, MotorSink};
use crate::nav::Navigator;
use crate::ntrip::{LinkMetrics, NtripClient};
use crate::position::PositionStore;
use crate::rover::RoverSupervisor;
use crate::telemetry::SessionMetrics;
use crate::transport::SerialTransport;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Correction frames in flight between the link and the receiver thread
const CORRECTION_CHANNEL_DEPTH: usize = 64;

/// Stream event buffer between the receiver thread and the supervisor
const EVENT_CHANNEL_DEPTH: usize = 8;

/// The assembled daemon.
pub struct RoverApp {
    supervisor: Arc<RoverSupervisor>,
    motor: Arc<MotorController>,
    shutdown: Arc<AtomicBool>,
    receiver: Option<ReceiverThread>,
    ntrip: Option<NtripClient>,
    threads: Vec<JoinHandle<()>>,
}

impl RoverApp {
    /// Build all components. Failure to open the receiver port or an
    /// invalid motor backend is fatal here; nothing is retried.
    pub fn new(config: RoverConfig) -> Result<Self> {
        log::info!("Initializing DishaNav");

        let shutdown = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(SessionMetrics::new());
        let parser_stats = Arc::new(Mutex::new(ParserStats::default()));

        let (store, position_rx) = PositionStore::new();
        let store = Arc::new(store);
        let (corrections_tx, corrections_rx) = bounded(CORRECTION_CHANNEL_DEPTH);
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_DEPTH);

        let transport = SerialTransport::open(&config.receiver.port, config.receiver.baud)?;
        let receiver = ReceiverThread::new(
            Box::new(transport),
            Arc::clone(&store),
            corrections_rx,
            events_tx,
            Arc::clone(&parser_stats),
            Arc::clone(&metrics),
            Arc::clone(&shutdown),
            Duration::from_millis(config.supervisor.stream_stale_ms),
        );

        let link_metrics = config
            .caster
            .as_ref()
            .map(|_| Arc::new(Mutex::new(LinkMetrics::new())));
        let ntrip = match (&config.caster, &link_metrics) {
            (Some(caster), Some(metrics_slot)) => Some(NtripClient::new(
                caster.clone(),
                corrections_tx,
                Arc::clone(&store),
                Arc::clone(metrics_slot),
                Arc::clone(&shutdown),
            )),
            _ => {
                log::warn!("No caster configured; running GPS-only without RTK corrections");
                None
            }
        };

        let sink = MotorSink::from_config(&config.motor)?;
        let motor = Arc::new(MotorController::new(&config.motor, sink));

        let navigator = Navigator::new(
            config.nav.clone(),
            Duration::from_secs_f64(config.supervisor.position_stale_s),
        );

        let supervisor = Arc::new(RoverSupervisor::new(
            &config,
            navigator,
            Arc::clone(&motor),
            store,
            position_rx,
            events_rx,
            parser_stats,
            link_metrics,
            metrics,
        ));

        log::info!("Components initialized");

        Ok(Self {
            supervisor,
            motor,
            shutdown,
            receiver: Some(receiver),
            ntrip,
            threads: Vec::new(),
        })
    }

    /// Handle for an embedding transport layer (HTTP, CLI) to issue
    /// operations while `run` owns the calling thread.
    pub fn supervisor(&self) -> Arc<RoverSupervisor> {
        Arc::clone(&self.supervisor)
    }

    /// Spawn the I/O threads and run the control loop until shutdown.
    pub fn run(&mut self) -> Result<()> {
        self.motor.start()?;

        let flag = Arc::clone(&self.shutdown);
        ctrlc::set_handler(move || {
            log::info!("Received shutdown signal");
            flag.store(true, Ordering::Relaxed);
        })
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        let mut receiver = self
            .receiver
            .take()
            .ok_or_else(|| Error::Config("application already ran".to_string()))?;
        self.threads.push(
            std::thread::Builder::new()
                .name("gnss-receiver".to_string())
                .spawn(move || receiver.run())?,
        );

        if let Some(mut ntrip) = self.ntrip.take() {
            self.threads.push(
                std::thread::Builder::new()
                    .name("ntrip-link".to_string())
                    .spawn(move || ntrip.run())?,
            );
        }

        log::info!("DishaNav running. Press Ctrl-C to stop.");

        // The supervisor tick owns this thread until shutdown
        self.supervisor.run(&self.shutdown);

        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        log::info!("Shutting down...");
        self.shutdown.store(true, Ordering::Relaxed);

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if let Err(e) = handle.join() {
                log::error!("Thread '{}' panicked: {:?}", name, e);
            }
        }

        self.motor.stop();
        log::info!("DishaNav stopped");
    }
}

impl Drop for RoverApp {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if !self.threads.is_empty() {
            self.teardown();
        }
    }
}
