use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use timegate_clock::ClockView;
use timegate_event_bus::{EventBus, InMemoryBus};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::model::{TriggerEvent, TriggerFire, TriggerParams};
use crate::plan::{plan, PlanStep};
use crate::rule::TriggerRule;

/// Fires below this lateness count as on time.
const LATE_TOLERANCE: Duration = Duration::from_millis(100);

pub type TriggerCallback = Arc<dyn Fn(&TriggerFire) + Send + Sync>;

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single timer chain for a trigger rule.
pub struct TriggerScheduler {
    rule: Arc<dyn TriggerRule>,
    clock: Arc<dyn ClockView>,
    params: TriggerParams,
    events: Arc<InMemoryBus<TriggerEvent>>,
    next_target: RwLock<Option<DateTime<Utc>>>,
    periods: AtomicU64,
    worker: Mutex<Option<Worker>>,
}

impl TriggerScheduler {
    pub fn new(
        rule: Arc<dyn TriggerRule>,
        clock: Arc<dyn ClockView>,
        params: TriggerParams,
    ) -> Arc<Self> {
        Arc::new(Self {
            rule,
            clock,
            params,
            events: InMemoryBus::new(64),
            next_target: RwLock::new(None),
            periods: AtomicU64::new(0),
            worker: Mutex::new(None),
        })
    }

    pub fn params(&self) -> &TriggerParams {
        &self.params
    }

    pub fn rule(&self) -> &Arc<dyn TriggerRule> {
        &self.rule
    }

    /// Starts the timer chain. Returns `false` when a chain is already armed,
    /// in which case `callback` is dropped.
    pub fn arm(self: &Arc<Self>, callback: Option<TriggerCallback>) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("trigger already armed");
            return false;
        }
        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let child = token.clone();
        let handle = tokio::spawn(async move {
            metrics::set_armed(true);
            this.run(child, callback).await;
            *this.next_target.write() = None;
            metrics::set_armed(false);
        });
        *worker = Some(Worker { token, handle });
        true
    }

    /// Clears the pending timer. Returns whether a chain was armed.
    pub fn cancel(&self) -> bool {
        match self.worker.lock().take() {
            Some(worker) => {
                worker.token.cancel();
                *self.next_target.write() = None;
                !worker.handle.is_finished()
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.token.cancel();
            if let Err(err) = worker.handle.await {
                warn!(?err, "trigger task ended abnormally");
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.events.subscribe()
    }

    /// Instant the armed chain is currently waiting for.
    pub fn next_target(&self) -> Option<DateTime<Utc>> {
        *self.next_target.read()
    }

    pub fn fired_periods(&self) -> u64 {
        self.periods.load(Ordering::SeqCst)
    }

    /// The next `count` instants of the rule after `from`.
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        crate::rule::upcoming(self.rule.as_ref(), from, count)
    }

    async fn run(&self, token: CancellationToken, callback: Option<TriggerCallback>) {
        let grace = chrono::Duration::from_std(self.params.grace).unwrap_or_default();
        let mut after = self.clock.adjusted_now() - grace;

        while let Some(target) = self.rule.next_after(after) {
            *self.next_target.write() = Some(target);
            info!(instant = %target.to_rfc3339(), rule = %self.rule.describe(), "trigger armed");
            self.events.publish_lossy(TriggerEvent::Armed { target });

            let mut refreshed = false;
            loop {
                let now = self.clock.adjusted_now();
                match plan(now, target, &self.params, refreshed) {
                    PlanStep::CoarseWait(wait) | PlanStep::SleepUntil(wait) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                debug!("trigger cancelled while waiting");
                                return;
                            }
                            _ = tokio::time::sleep(wait) => {}
                        }
                    }
                    PlanStep::Refresh => {
                        refreshed = true;
                        debug!(instant = %target.to_rfc3339(), "pre-fire refresh");
                        self.events.publish_lossy(TriggerEvent::PreFire { target });
                    }
                    PlanStep::Fire { late_by } => {
                        if token.is_cancelled() {
                            return;
                        }
                        let period = self.periods.fetch_add(1, Ordering::SeqCst) + 1;
                        let fire = TriggerFire {
                            target,
                            fired_at: now,
                            late_by_ms: late_by.as_millis() as i64,
                            period,
                        };
                        let late = late_by > LATE_TOLERANCE;
                        metrics::record_fire(late);
                        if late {
                            warn!(late_by_ms = fire.late_by_ms, "trigger fired late");
                        } else {
                            info!(period, "trigger fired");
                        }
                        if let Some(callback) = &callback {
                            callback(&fire);
                        }
                        self.events.publish_lossy(TriggerEvent::Fired(fire));
                        after = target;
                        break;
                    }
                    PlanStep::Missed { late_by } => {
                        metrics::record_missed();
                        warn!(
                            instant = %target.to_rfc3339(),
                            late_by_ms = late_by.as_millis() as u64,
                            "trigger missed; re-arming for next period"
                        );
                        self.events.publish_lossy(TriggerEvent::Missed {
                            target,
                            late_by_ms: late_by.as_millis() as i64,
                        });
                        after = target.max(now - grace);
                        break;
                    }
                }
            }
        }
        info!("trigger rule exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Once;
    use chrono::FixedOffset;
    use std::sync::atomic::AtomicUsize;
    use timegate_clock::StaticClock;

    fn params(recheck_ms: u64, lead_ms: Option<u64>) -> TriggerParams {
        TriggerParams {
            tz: FixedOffset::east_opt(0).unwrap(),
            recheck_interval: Duration::from_millis(recheck_ms),
            refresh_lead: lead_ms.map(Duration::from_millis),
            grace: Duration::from_millis(1_000),
        }
    }

    fn in_ms(ms: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(ms)
    }

    fn counting_callback() -> (TriggerCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let callback: TriggerCallback = Arc::new(move |_fire: &TriggerFire| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    #[tokio::test]
    async fn fires_exactly_once_despite_many_rechecks() {
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(in_ms(300))),
            Arc::new(StaticClock::new(0)),
            params(5, None),
        );
        let (callback, count) = counting_callback();
        assert!(scheduler.arm(Some(callback)));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.fired_periods(), 1);
        assert!(!scheduler.is_armed(), "once rule exhausts after firing");
    }

    #[tokio::test]
    async fn second_arm_is_a_no_op() {
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(in_ms(200))),
            Arc::new(StaticClock::new(0)),
            params(20, None),
        );
        let (first, count) = counting_callback();
        let (second, second_count) = counting_callback();
        assert!(scheduler.arm(Some(first)));
        assert!(!scheduler.arm(Some(second)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_clears_pending_timer() {
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(in_ms(200))),
            Arc::new(StaticClock::new(0)),
            params(20, None),
        );
        let (callback, count) = counting_callback();
        scheduler.arm(Some(callback));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.next_target().is_some());

        assert!(scheduler.cancel());
        assert_eq!(scheduler.next_target(), None);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!scheduler.cancel());
    }

    #[tokio::test]
    async fn broadcasts_prefire_before_fire() {
        let target = in_ms(400);
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(target)),
            Arc::new(StaticClock::new(0)),
            params(50, Some(150)),
        );
        let mut rx = scheduler.subscribe();
        scheduler.arm(None);

        let armed = rx.recv().await.unwrap();
        assert_eq!(armed, TriggerEvent::Armed { target });
        assert_eq!(rx.recv().await.unwrap(), TriggerEvent::PreFire { target });
        match rx.recv().await.unwrap() {
            TriggerEvent::Fired(fire) => {
                assert_eq!(fire.target, target);
                assert_eq!(fire.period, 1);
                assert!(fire.fired_at >= target);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_wake_within_grace_fires_immediately() {
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(in_ms(-300))),
            Arc::new(StaticClock::new(0)),
            params(20, None),
        );
        let mut rx = scheduler.subscribe();
        scheduler.arm(None);

        assert!(matches!(rx.recv().await.unwrap(), TriggerEvent::Armed { .. }));
        match rx.recv().await.unwrap() {
            TriggerEvent::Fired(fire) => assert!(fire.late_by_ms >= 300),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn clock_jump_past_grace_is_missed() {
        let clock = Arc::new(StaticClock::new(0));
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(in_ms(300))),
            clock.clone(),
            params(20, None),
        );
        let (callback, count) = counting_callback();
        let mut rx = scheduler.subscribe();
        scheduler.arm(Some(callback));
        assert!(matches!(rx.recv().await.unwrap(), TriggerEvent::Armed { .. }));

        // as if the machine slept through the instant
        clock.set_offset_ms(10_000);
        match rx.recv().await.unwrap() {
            TriggerEvent::Missed { late_by_ms, .. } => assert!(late_by_ms > 1_000),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn upcoming_lists_future_instants() {
        let scheduler = TriggerScheduler::new(
            Arc::new(Once::new(in_ms(60_000))),
            Arc::new(StaticClock::new(0)),
            params(20, None),
        );
        assert_eq!(scheduler.upcoming(Utc::now(), 3).len(), 1);
    }
}
