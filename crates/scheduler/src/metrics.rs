use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref TRIGGER_ARMED: IntGauge = IntGauge::new(
        "timegate_trigger_armed",
        "1 while a trigger chain is armed"
    )
    .unwrap();
    static ref TRIGGER_FIRES: IntCounter =
        IntCounter::new("timegate_trigger_fires_total", "Trigger instants fired").unwrap();
    static ref TRIGGER_LATE_FIRES: IntCounter = IntCounter::new(
        "timegate_trigger_late_fires_total",
        "Trigger instants fired late within the grace window"
    )
    .unwrap();
    static ref TRIGGER_MISSED: IntCounter = IntCounter::new(
        "timegate_trigger_missed_total",
        "Trigger instants missed beyond the grace window"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register trigger metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, TRIGGER_ARMED.clone());
    register(registry, TRIGGER_FIRES.clone());
    register(registry, TRIGGER_LATE_FIRES.clone());
    register(registry, TRIGGER_MISSED.clone());
}

pub fn set_armed(armed: bool) {
    TRIGGER_ARMED.set(i64::from(armed));
}

pub fn record_fire(late: bool) {
    TRIGGER_FIRES.inc();
    if late {
        TRIGGER_LATE_FIRES.inc();
    }
}

pub fn record_missed() {
    TRIGGER_MISSED.inc();
}

#[derive(Clone, Debug, Default)]
pub struct TriggerMetricsSnapshot {
    pub fires: u64,
    pub late_fires: u64,
    pub missed: u64,
}

pub fn snapshot() -> TriggerMetricsSnapshot {
    TriggerMetricsSnapshot {
        fires: TRIGGER_FIRES.get(),
        late_fires: TRIGGER_LATE_FIRES.get(),
        missed: TRIGGER_MISSED.get(),
    }
}
