//! Latest-sample position store
//!
//! Single slot holding the most recent accepted kinematic sample. Writers
//! (the receiver thread) and readers (supervisor, correction link) all go
//! through one mutex; the supervisor additionally gets a bounded(1)
//! notification channel so its tick can drain updates without polling the
//! slot contents.

use crate::gnss::KinematicSample;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct Inner {
    latest: Option<KinematicSample>,
    /// Last accepted raw GGA sentence, sent verbatim upstream to the caster
    raw_gga: Option<String>,
    /// Samples dropped for arriving with a timestamp older than the slot
    rejected_stale: u64,
}

/// Thread-safe latest-position slot.
pub struct PositionStore {
    inner: Mutex<Inner>,
    notify_tx: Sender<()>,
}

impl PositionStore {
    /// Create the store and the subscription end for the supervisor.
    pub fn new() -> (Self, Receiver<()>) {
        let (notify_tx, notify_rx) = bounded(1);
        (
            Self {
                inner: Mutex::new(Inner {
                    latest: None,
                    raw_gga: None,
                    rejected_stale: 0,
                }),
                notify_tx,
            },
            notify_rx,
        )
    }

    /// Store a new sample; returns false when it was older than the current
    /// one (late arrival after a stream gap) and was dropped.
    pub fn update(&self, sample: KinematicSample) -> bool {
        {
            let mut inner = self.inner.lock();
            if let Some(current) = &inner.latest {
                if sample.fix.received_at < current.fix.received_at {
                    inner.rejected_stale += 1;
                    return false;
                }
            }
            inner.latest = Some(sample);
        }
        // Full channel means a notification is already pending; that is
        // exactly the coalescing we want.
        let _ = self.notify_tx.try_send(());
        true
    }

    /// Latest accepted sample, if any
    pub fn latest(&self) -> Option<KinematicSample> {
        self.inner.lock().latest.clone()
    }

    /// True when no sample exists or the newest one is older than `max_age`
    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        match &self.inner.lock().latest {
            Some(sample) => sample.age(now) > max_age,
            None => true,
        }
    }

    /// Record the most recent accepted raw GGA sentence
    pub fn set_raw_gga(&self, sentence: String) {
        self.inner.lock().raw_gga = Some(sentence);
    }

    /// Raw GGA for the caster back-channel
    pub fn raw_gga(&self) -> Option<String> {
        self.inner.lock().raw_gga.clone()
    }

    /// Count of late samples dropped to keep timestamps monotonic
    pub fn rejected_stale(&self) -> u64 {
        self.inner.lock().rejected_stale
    }
}
