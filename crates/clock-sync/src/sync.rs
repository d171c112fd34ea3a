use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use timegate_event_bus::{EventBus, InMemoryBus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClockError;
use crate::metrics;
use crate::source::TimeSource;

/// Read access to the network-corrected clock.
pub trait ClockView: Send + Sync {
    fn offset_ms(&self) -> i64;

    fn adjusted_now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.offset_ms())
    }
}

/// A clock with a fixed offset. Useful offline and in tests.
#[derive(Debug, Default)]
pub struct StaticClock {
    offset_ms: AtomicI64,
}

impl StaticClock {
    pub fn new(offset_ms: i64) -> Self {
        Self {
            offset_ms: AtomicI64::new(offset_ms),
        }
    }

    pub fn set_offset_ms(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::SeqCst);
    }
}

impl ClockView for StaticClock {
    fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClockStatus {
    pub offset_ms: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub synced: bool,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClockEvent {
    Update {
        offset_ms: i64,
        rtt_ms: i64,
        at: DateTime<Utc>,
    },
    Error {
        error: String,
        at: DateTime<Utc>,
    },
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ClockSync {
    source: Arc<dyn TimeSource>,
    threshold_ms: AtomicI64,
    status: RwLock<ClockStatus>,
    events: Arc<InMemoryBus<ClockEvent>>,
    worker: Mutex<Option<Worker>>,
}

impl ClockSync {
    pub fn new(source: Arc<dyn TimeSource>, threshold_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            source,
            threshold_ms: AtomicI64::new(threshold_ms),
            status: RwLock::new(ClockStatus::default()),
            events: InMemoryBus::new(64),
            worker: Mutex::new(None),
        })
    }

    /// Arms the periodic sync loop. The first sample is taken immediately.
    /// Returns `false` when a loop is already running.
    pub fn start(self: &Arc<Self>, interval: Duration, threshold_ms: i64) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }
        self.threshold_ms.store(threshold_ms, Ordering::SeqCst);

        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        // errors are recorded in status and published; retried next tick
                        let _ = this.sync_once().await;
                    }
                }
            }
            debug!(source = this.source.name(), "clock sync loop stopped");
        });
        info!(
            source = self.source.name(),
            interval_ms = interval.as_millis() as u64,
            threshold_ms,
            "clock sync armed"
        );
        *worker = Some(Worker { token, handle });
        true
    }

    /// Takes one sample. A failure leaves the previous offset and sync time in place.
    pub async fn sync_once(&self) -> Result<i64, ClockError> {
        let sent = Utc::now();
        let fetched = self.source.fetch().await;
        let received = Utc::now();

        match fetched {
            Ok(network) => {
                let rtt = received - sent;
                let midpoint = sent + rtt / 2;
                let offset_ms = (network - midpoint).num_milliseconds();
                let threshold = self.threshold_ms.load(Ordering::SeqCst);
                {
                    let mut status = self.status.write();
                    status.offset_ms = offset_ms;
                    status.last_synced_at = Some(received);
                    status.synced = offset_ms.abs() < threshold;
                    status.last_error = None;
                }
                metrics::record_success(offset_ms);
                debug!(offset_ms, rtt_ms = rtt.num_milliseconds(), "clock synced");
                self.events.publish_lossy(ClockEvent::Update {
                    offset_ms,
                    rtt_ms: rtt.num_milliseconds(),
                    at: received,
                });
                Ok(offset_ms)
            }
            Err(err) => {
                self.status.write().last_error = Some(err.to_string());
                metrics::record_failure();
                warn!(source = self.source.name(), error = %err, "clock sync failed; keeping previous offset");
                self.events.publish_lossy(ClockEvent::Error {
                    error: err.to_string(),
                    at: received,
                });
                Err(err)
            }
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.status.read().offset_ms
    }

    pub fn is_synced(&self) -> bool {
        self.status.read().synced
    }

    pub fn status(&self) -> ClockStatus {
        self.status.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Stops the periodic loop and waits for it to exit.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.token.cancel();
            if let Err(err) = worker.handle.await {
                warn!(?err, "clock sync task ended abnormally");
            }
        }
    }
}

impl ClockView for ClockSync {
    fn offset_ms(&self) -> i64 {
        ClockSync::offset_ms(self)
    }
}
