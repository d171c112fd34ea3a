use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use timegate_core_types::ProcessState;
use tracing::error;

lazy_static! {
    static ref PROCESS_STARTS: IntCounter =
        IntCounter::new("timegate_process_starts_total", "Processes started").unwrap();
    static ref PROCESS_STOPS: IntCounter =
        IntCounter::new("timegate_process_stops_total", "Processes that reached Stopped").unwrap();
    static ref PROCESS_ERRORS: IntCounter =
        IntCounter::new("timegate_process_errors_total", "Processes that reached Error").unwrap();
    static ref PROCESS_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "timegate_process_transitions_total",
            "State transitions by destination state"
        ),
        &["state"]
    )
    .unwrap();
    static ref PROCESS_ACTIVE: IntGauge =
        IntGauge::new("timegate_process_active", "Processes with a running task").unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register process metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, PROCESS_STARTS.clone());
    register(registry, PROCESS_STOPS.clone());
    register(registry, PROCESS_ERRORS.clone());
    register(registry, PROCESS_TRANSITIONS.clone());
    register(registry, PROCESS_ACTIVE.clone());
}

pub fn record_start() {
    PROCESS_STARTS.inc();
    PROCESS_ACTIVE.inc();
}

pub fn record_exit() {
    PROCESS_ACTIVE.dec();
}

pub fn record_transition(state: ProcessState) {
    PROCESS_TRANSITIONS
        .with_label_values(&[state.as_str()])
        .inc();
    match state {
        ProcessState::Stopped => PROCESS_STOPS.inc(),
        ProcessState::Error => PROCESS_ERRORS.inc(),
        _ => {}
    }
}
