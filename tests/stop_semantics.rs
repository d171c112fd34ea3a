//! `stop` must end a process from whichever state it is in.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use browser_driver::stub::{ElementBehavior, StubDriver};
use browser_driver::{BrowserDriver, Selector};
use common::*;
use timegate_core_types::{ProcessState, StatusLevel};
use timegate_event_bus::EventBus;
use timegate_process::{StopAck, StopOptions, VerificationSpec};

/// cancel_poll_ms of the fast process config is 50; leave generous headroom.
const STOP_BOUND: Duration = Duration::from_millis(1_500);

async fn stop_from(hx: &Harness, state: ProcessState) {
    let registry = &hx.orchestrator.registry;
    let handle = registry.handle(&id("alice")).unwrap();
    reach(&handle, state).await;

    let started = Instant::now();
    let acks = registry.stop(&[id("alice")], StopOptions::default()).await;
    assert_eq!(acks[0].1, StopAck::Stopping);
    let terminal = tokio::time::timeout(STOP_BOUND, handle.wait_terminal())
        .await
        .unwrap_or_else(|_| panic!("stop from {state} not observed in time"));
    assert_eq!(terminal, ProcessState::Stopped);
    assert!(started.elapsed() < STOP_BOUND);

    assert!(registry.handle(&id("alice")).is_none());
    assert_eq!(hx.driver.open_sessions(), 0);
    hx.orchestrator.shutdown().await;
}

/// Harness whose orchestrator sees `slow` in front of a permissive stub.
async fn slowed_harness(
    config: &timegate_cli::config::AppConfig,
    slow: impl FnOnce(SlowDriver) -> SlowDriver,
) -> (Harness, Arc<SlowDriver>) {
    let stub = StubDriver::permissive();
    let slowed = Arc::new(slow(SlowDriver::new(stub.clone())));
    let wired: Arc<dyn BrowserDriver> = slowed.clone();
    (harness_over(config, stub, wired, 0).await, slowed)
}

#[tokio::test]
async fn stop_while_starting() {
    let hx = harness(&config(profile(), in_ms(60_000)), StubDriver::permissive(), 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    let handle = hx.orchestrator.registry.handle(&id("alice")).unwrap();
    assert_eq!(handle.state(), ProcessState::Starting);
    stop_from(&hx, ProcessState::Starting).await;
}

#[tokio::test]
async fn stop_while_navigating() {
    let driver = StubDriver::permissive();
    driver.set_navigate_delay(Duration::from_secs(30));
    let hx = harness(&config(profile(), in_ms(60_000)), driver, 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    stop_from(&hx, ProcessState::Navigating).await;
}

#[tokio::test]
async fn stop_while_waiting_for_load() {
    let driver = StubDriver::permissive();
    driver.set_load_delay(Duration::from_secs(30));
    let mut config = config(profile(), in_ms(60_000));
    config.process.load_timeout_ms = 60_000;
    let hx = harness(&config, driver, 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    stop_from(&hx, ProcessState::Navigating).await;
}

#[tokio::test]
async fn stop_while_handling_consent() {
    let (hx, slowed) = slowed_harness(&config(profile(), in_ms(60_000)), |driver| {
        driver.slow("#accept", Duration::from_millis(300), SlowEnd::Succeed)
    })
    .await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    slowed.in_flight().await;
    stop_from(&hx, ProcessState::ConsentHandling).await;
    assert!(hx.driver.fills().is_empty(), "contact stage never ran");
}

#[tokio::test]
async fn stop_while_contact_is_initiated() {
    let (hx, slowed) = slowed_harness(&config(profile(), in_ms(60_000)), |driver| {
        driver.slow("#name", Duration::from_millis(300), SlowEnd::Succeed)
    })
    .await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    slowed.in_flight().await;
    stop_from(&hx, ProcessState::ContactInitiated).await;
    assert!(
        !hx.driver.clicks().contains(&Selector::Css("#send".into())),
        "no step after the stop"
    );
}

#[tokio::test]
async fn stop_during_failing_last_attempt_is_not_an_error() {
    let mut profile = profile();
    profile.contact = profile.contact.clone().with_retry(quick_retry(1));
    let (hx, slowed) = slowed_harness(&config(profile, in_ms(60_000)), |driver| {
        driver.slow("#send", Duration::from_millis(300), SlowEnd::Reject)
    })
    .await;
    let mut events = hx.bus.subscribe();
    hx.orchestrator.registry.start(&[id("alice")]).await;
    slowed.in_flight().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    stop_from(&hx, ProcessState::ContactInitiated).await;
    let events = drain(&mut events);
    assert!(events.iter().all(|event| event.state != ProcessState::Error));
    assert!(events.iter().all(|event| event.level != StatusLevel::Error));
    assert_eq!(events.last().map(|event| event.state), Some(ProcessState::Stopped));
}

#[tokio::test]
async fn stop_while_attempting_reservation() {
    let (hx, slowed) = slowed_harness(&config(profile(), in_ms(400)), |driver| {
        driver.slow("#book", Duration::from_millis(300), SlowEnd::Succeed)
    })
    .await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    slowed.in_flight().await;
    stop_from(&hx, ProcessState::AttemptingReservation).await;
}

#[tokio::test]
async fn stop_while_awaiting_verification() {
    let mut profile = profile();
    profile.verification = Some(VerificationSpec {
        url_patterns: vec!["verify".into()],
        ..VerificationSpec::default()
    });
    let hx = harness(&config(profile, in_ms(60_000)), StubDriver::permissive(), 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    stop_from(&hx, ProcessState::AwaitingIdentityVerification).await;
}

#[tokio::test]
async fn stop_while_waiting_for_trigger() {
    let hx = harness(&config(profile(), in_ms(60_000)), StubDriver::permissive(), 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    stop_from(&hx, ProcessState::WaitingForTrigger).await;
}

#[tokio::test]
async fn stop_while_maintaining() {
    let hx = harness(&config(profile(), in_ms(400)), StubDriver::permissive(), 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    stop_from(&hx, ProcessState::Maintaining).await;
}

#[tokio::test]
async fn stop_while_holding_a_warning() {
    let driver = StubDriver::permissive();
    driver.add_element(Selector::Css("#book".into()), ElementBehavior::hidden());
    let hx = harness(&config(profile(), in_ms(400)), driver, 0).await;
    hx.orchestrator.registry.start(&[id("alice")]).await;
    stop_from(&hx, ProcessState::Warning).await;
}

#[tokio::test]
async fn stop_after_error_removes_the_entry() {
    let driver = StubDriver::permissive();
    driver.fail_navigation(ENTRY, 10);
    let hx = harness(&config(profile(), in_ms(60_000)), driver, 0).await;
    let registry = &hx.orchestrator.registry;
    registry.start(&[id("alice")]).await;

    let handle = registry.handle(&id("alice")).unwrap();
    assert_eq!(handle.wait_terminal().await, ProcessState::Error);
    assert_eq!(hx.driver.open_sessions(), 0);

    let acks = registry.stop(&[id("alice")], StopOptions::default()).await;
    assert_eq!(acks[0].1, StopAck::Removed);
    let acks = registry.stop(&[id("alice")], StopOptions::default()).await;
    assert_eq!(acks[0].1, StopAck::NotFound);
    hx.orchestrator.shutdown().await;
}

#[tokio::test]
async fn detach_leaves_the_session_open() {
    let hx = harness(&config(profile(), in_ms(60_000)), StubDriver::permissive(), 0).await;
    let registry = &hx.orchestrator.registry;
    registry.start(&[id("alice")]).await;
    let handle = registry.handle(&id("alice")).unwrap();
    reach(&handle, ProcessState::WaitingForTrigger).await;

    registry.stop(&[id("alice")], StopOptions::detach()).await;
    assert_eq!(handle.wait_terminal().await, ProcessState::Stopped);
    assert_eq!(hx.driver.open_sessions(), 1);
    hx.orchestrator.shutdown().await;
}
