use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use timegate_cli::cli::runtime::load_config;
use timegate_cli::config::AppConfig;
use timegate_clock::{ClockError, ClockSync, ClockView, TimeSource};
use timegate_process::{ExhaustionPolicy, KeepAlive, Stage};
use timegate_scheduler::{upcoming, RuleKind};

fn sample_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/timegate.example.yaml")
}

#[tokio::test]
async fn sample_config_loads_and_validates() {
    let loaded = load_config(Some(sample_config_path().as_path())).await.unwrap();
    assert!(loaded.found);
    let config = loaded.config;
    config.validate().unwrap();

    assert_eq!(config.metrics_port, 9100);
    assert_eq!(config.trigger.rule, RuleKind::MonthRollover);
    assert_eq!(config.targets.len(), 2);

    let clinic = &config.profiles["clinic"];
    assert_eq!(clinic.urls().count(), 2);
    assert_eq!(clinic.contact.steps.len(), 3);
    assert_eq!(
        clinic.reservation.policy_for(Stage::Reservation),
        ExhaustionPolicy::Warn
    );
    assert_eq!(clinic.consent.policy_for(Stage::Consent), ExhaustionPolicy::Continue);
    assert!(matches!(clinic.keepalive, KeepAlive::Hover { .. }));

    let rule = config.trigger.build_rule().unwrap();
    let next = upcoming(rule.as_ref(), Utc::now(), 3);
    assert_eq!(next.len(), 3);
    assert!(next.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn missing_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_config(Some(dir.path().join("nope.yaml").as_path())).await.unwrap();
    assert!(!loaded.found);
    assert_eq!(loaded.config, AppConfig::default());
}

/// Succeeds once with `skew_ms`, then always fails.
struct FlakySource {
    skew_ms: i64,
    calls: AtomicU32,
}

#[async_trait]
impl TimeSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Utc::now() + chrono::Duration::milliseconds(self.skew_ms))
        } else {
            Err(ClockError::Request("connection refused".into()))
        }
    }
}

#[tokio::test]
async fn failed_sync_keeps_the_previous_offset() {
    let clock = ClockSync::new(
        Arc::new(FlakySource {
            skew_ms: 4_000,
            calls: AtomicU32::new(0),
        }),
        500,
    );
    assert!(!clock.is_synced());

    let offset = clock.sync_once().await.unwrap();
    assert!((3_900..=4_100).contains(&offset), "offset {offset}");
    let before = clock.status();
    assert!(!before.synced, "a 4s offset is outside the threshold");

    assert!(clock.sync_once().await.is_err());
    let after = clock.status();
    assert_eq!(after.offset_ms, before.offset_ms);
    assert_eq!(after.last_synced_at, before.last_synced_at);
    assert!(after.last_error.is_some());

    let corrected = clock.adjusted_now();
    let drift = (corrected - Utc::now()).num_milliseconds();
    assert!((3_800..=4_200).contains(&drift), "drift {drift}");
}

#[tokio::test]
async fn periodic_sync_survives_failures() {
    let clock = ClockSync::new(
        Arc::new(FlakySource {
            skew_ms: 100,
            calls: AtomicU32::new(0),
        }),
        500,
    );
    assert!(clock.start(Duration::from_millis(20), 500));
    assert!(!clock.start(Duration::from_millis(20), 500));
    tokio::time::sleep(Duration::from_millis(120)).await;

    let status = clock.status();
    assert!(status.synced);
    assert!(status.last_error.is_some());
    assert!(clock.is_running());

    clock.shutdown().await;
    assert!(!clock.is_running());
}
