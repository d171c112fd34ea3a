mod common;

use std::time::Duration;

use action_locator::{CandidateLocator, ElementResolver, LocatorSpec};
use browser_driver::stub::{ElementBehavior, StubDriver};
use browser_driver::{BrowserDriver, Selector};
use chrono::Utc;
use common::*;
use timegate_core_types::ProcessState;
use timegate_event_bus::EventBus;
use timegate_process::StartAck;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fires_on_corrected_time_without_user_input() {
    // the network clock runs 1.5s ahead, so a network instant 2s out is local +2s
    let skew_ms = 1_500;
    let local_start = Utc::now();
    let fire_at = in_ms(skew_ms + 2_000);
    let config = config(profile(), fire_at);
    let hx = harness(&config, StubDriver::permissive(), skew_ms).await;
    let mut events = hx.bus.subscribe();

    hx.orchestrator.registry.start(&[id("alice")]).await;
    let handle = hx.orchestrator.registry.handle(&id("alice")).unwrap();
    reach(&handle, ProcessState::Maintaining).await;

    let events = drain(&mut events);
    let attempt = events
        .iter()
        .find(|e| e.state == ProcessState::AttemptingReservation)
        .expect("reservation attempted");
    let elapsed = attempt.timestamp - local_start;
    assert!(elapsed >= chrono::Duration::milliseconds(1_900), "fired early: {elapsed}");
    assert!(elapsed < chrono::Duration::milliseconds(3_400), "fired on local time: {elapsed}");

    let states: Vec<_> = events.iter().map(|e| e.state).collect();
    let waiting = states
        .iter()
        .position(|s| *s == ProcessState::WaitingForTrigger)
        .unwrap();
    let attempting = states
        .iter()
        .position(|s| *s == ProcessState::AttemptingReservation)
        .unwrap();
    assert!(waiting < attempting);
    assert!(hx.driver.fills().contains(&(Selector::Css("#name".into()), "Alice".into())));
    assert!(hx.driver.clicks().contains(&Selector::Css("#book".into())));

    hx.orchestrator.shutdown().await;
    assert_eq!(hx.driver.open_sessions(), 0);
}

#[tokio::test]
async fn second_start_does_not_open_a_second_session() {
    let config = config(profile(), in_ms(60_000));
    let hx = harness(&config, StubDriver::permissive(), 0).await;

    let first = hx.orchestrator.registry.start(&[id("alice")]).await;
    let handle = hx.orchestrator.registry.handle(&id("alice")).unwrap();
    reach(&handle, ProcessState::WaitingForTrigger).await;
    let second = hx.orchestrator.registry.start(&[id("alice")]).await;

    assert_eq!(first[0].1, StartAck::Started);
    assert_eq!(second[0].1, StartAck::AlreadyActive);
    assert_eq!(hx.driver.launch_count(), 1);
    assert_eq!(hx.driver.open_sessions(), 1);

    hx.orchestrator.shutdown().await;
}

#[tokio::test]
async fn targets_run_independently() {
    let config = config(profile(), in_ms(60_000));
    let hx = harness(&config, StubDriver::permissive(), 0).await;

    let acks = hx.orchestrator.registry.start(&[id("alice"), id("bob")]).await;
    assert!(acks.iter().all(|(_, ack)| *ack == StartAck::Started));
    for name in ["alice", "bob"] {
        let handle = hx.orchestrator.registry.handle(&id(name)).unwrap();
        reach(&handle, ProcessState::WaitingForTrigger).await;
    }
    assert_eq!(hx.driver.open_sessions(), 2);

    hx.orchestrator
        .registry
        .stop(&[id("alice")], Default::default())
        .await;
    let alice = hx.orchestrator.registry.handle(&id("alice"));
    if let Some(alice) = alice {
        assert_eq!(alice.wait_terminal().await, ProcessState::Stopped);
    }
    let bob = hx.orchestrator.registry.handle(&id("bob")).unwrap();
    assert_eq!(bob.state(), ProcessState::WaitingForTrigger);

    hx.orchestrator.shutdown().await;
}

#[tokio::test]
async fn first_interactable_candidate_wins_in_declared_order() {
    let driver = StubDriver::new();
    driver.add_element(Selector::Css("#gone".into()), ElementBehavior::hidden());
    driver.add_element(Selector::Text("Book".into()), ElementBehavior::interactable());
    driver.add_element(Selector::Css("#book".into()), ElementBehavior::interactable());

    let session = driver.launch().await.unwrap();
    let page = driver.new_page(&session).await.unwrap();
    let locator = CandidateLocator::new(driver.clone());

    let candidates = vec![
        LocatorSpec::css("#missing"),
        LocatorSpec::css("#gone"),
        LocatorSpec::text("Book"),
        LocatorSpec::css("#book"),
    ];
    let resolution = locator.resolve(&page, &candidates).await.unwrap();
    assert_eq!(resolution.index, 2);

    let probed = driver.locate_calls();
    assert_eq!(probed.len(), 3);
    assert_eq!(probed[0], Selector::Css("#missing".into()));
    assert_eq!(probed[2], Selector::Text("Book".into()));

    tokio::time::timeout(Duration::from_secs(1), driver.close(&session))
        .await
        .unwrap()
        .unwrap();
}
