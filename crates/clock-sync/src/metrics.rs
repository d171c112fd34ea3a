use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref CLOCK_SYNC_SUCCESS: IntCounter = IntCounter::new(
        "timegate_clock_sync_success_total",
        "Successful network time samples"
    )
    .unwrap();
    static ref CLOCK_SYNC_FAILURES: IntCounter = IntCounter::new(
        "timegate_clock_sync_failures_total",
        "Failed network time samples"
    )
    .unwrap();
    static ref CLOCK_OFFSET_MS: IntGauge = IntGauge::new(
        "timegate_clock_offset_ms",
        "Network time minus local time, in milliseconds"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register clock metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CLOCK_SYNC_SUCCESS.clone());
    register(registry, CLOCK_SYNC_FAILURES.clone());
    register(registry, CLOCK_OFFSET_MS.clone());
}

pub fn record_success(offset_ms: i64) {
    CLOCK_SYNC_SUCCESS.inc();
    CLOCK_OFFSET_MS.set(offset_ms);
}

pub fn record_failure() {
    CLOCK_SYNC_FAILURES.inc();
}
