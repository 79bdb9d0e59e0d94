//! Integration tests for the supervising coordinator loop.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::fixtures::{domain_map, ProgramBuilder};
use common::{eventually, fast_config, TestFleet};
use halyard_fleet::{CoordinatorState, DomainMap, FleetError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn sweep_runs_on_its_own_cadence() {
    let fleet = TestFleet::new();
    let (_tx, rx) = watch::channel(DomainMap::new());
    let handle = fleet.coordinator(fast_config()).start(rx).await;

    fleet
        .workers
        .register("W1", "http://w1", ["python"], Duration::from_secs(2));
    fleet
        .workers
        .register("W2", "http://w2", ["python"], Duration::from_secs(60));

    sleep(Duration::from_millis(3500)).await;

    assert!(fleet.workers.get("W1").is_none());
    assert!(fleet.workers.get("W2").is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_refresh_does_not_delay_sweep() {
    let fleet = TestFleet::new();
    let db = fleet.connector.add_database("memory://a");
    db.insert_program(ProgramBuilder::new("slow").build());
    db.set_query_delay(Duration::from_secs(30));

    let (_tx, rx) = watch::channel(domain_map(&[("a", "memory://a")]));
    let handle = fleet.coordinator(fast_config()).start(rx).await;
    assert_eq!(fleet.cache.snapshot().generation, 1);

    // The first refresh tick fires 10s after start and runs for 30s.
    sleep(Duration::from_millis(10_500)).await;
    fleet
        .workers
        .register("W1", "http://w1", ["tengo"], Duration::from_secs(2));
    sleep(Duration::from_secs(3)).await;

    assert_eq!(fleet.cache.snapshot().generation, 1);
    assert!(fleet.workers.is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn configuration_change_reconciles_domains_and_cache() {
    let fleet = TestFleet::new();
    let db_a = fleet.connector.add_database("memory://a");
    let program = ProgramBuilder::new("nightly-report")
        .with_language("python")
        .build();
    fleet
        .connector
        .add_database("memory://b")
        .insert_program(program.clone());

    let (tx, rx) = watch::channel(domain_map(&[("a", "memory://a")]));
    let handle = fleet.coordinator(fast_config()).start(rx).await;
    assert_eq!(fleet.domains.len(), 1);

    tx.send(domain_map(&[("b", "memory://b")])).unwrap();

    eventually(|| fleet.cache.lookup("b", program.id).is_ok()).await;
    assert_eq!(
        fleet.domains.list_domains().into_iter().collect::<Vec<_>>(),
        vec!["b"]
    );
    assert_eq!(db_a.open_handles(), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unreachable_domain_is_retried_on_refresh() {
    let mut fleet = TestFleet::new();
    let (_tx, rx) = watch::channel(domain_map(&[("b", "memory://b")]));
    let handle = fleet.coordinator(fast_config()).start(rx).await;

    let err = fleet.errors.recv().await.unwrap();
    assert!(matches!(err, FleetError::Connection { ref domain, .. } if domain == "b"));
    assert!(fleet.domains.is_empty());

    let program = ProgramBuilder::new("late").build();
    let db = fleet.connector.add_database("memory://b");
    db.insert_program(program.clone());

    sleep(Duration::from_millis(10_500)).await;
    eventually(|| fleet.cache.lookup("b", program.id).is_ok()).await;
    assert_eq!(
        fleet.domains.list_domains().into_iter().collect::<Vec<_>>(),
        vec!["b"]
    );
    assert_eq!(db.open_handles(), 1);

    // Once installed, later ticks leave the handle alone.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(db.connections_opened(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rapid_changes_converge_on_the_latest_mapping() {
    let fleet = TestFleet::new();
    for uri in ["memory://a", "memory://b", "memory://c"] {
        fleet.connector.add_database(uri);
    }

    let (tx, rx) = watch::channel(DomainMap::new());
    let handle = fleet.coordinator(fast_config()).start(rx).await;

    tx.send(domain_map(&[("a", "memory://a")])).unwrap();
    tx.send(domain_map(&[("a", "memory://a"), ("b", "memory://b")]))
        .unwrap();
    tx.send(domain_map(&[("c", "memory://c")])).unwrap();

    eventually(|| fleet.domains.uris() == domain_map(&[("c", "memory://c")])).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_refresh() {
    let fleet = TestFleet::new();
    let db = fleet.connector.add_database("memory://a");
    db.set_query_delay(Duration::from_secs(30));

    let (_tx, rx) = watch::channel(domain_map(&[("a", "memory://a")]));
    let handle = fleet.coordinator(fast_config()).start(rx).await;
    let mut state = handle.subscribe();

    sleep(Duration::from_millis(10_500)).await;
    assert_eq!(fleet.cache.snapshot().generation, 1);

    handle.shutdown().await.unwrap();

    assert_eq!(fleet.cache.snapshot().generation, 2);
    assert_eq!(*state.borrow_and_update(), CoordinatorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn reconcile_and_refresh_errors_reach_the_channel() {
    let mut fleet = TestFleet::new();
    let db = fleet.connector.add_database("memory://a");

    let (_tx, rx) = watch::channel(domain_map(&[
        ("a", "memory://a"),
        ("broken", "memory://nowhere"),
    ]));
    let handle = fleet.coordinator(fast_config()).start(rx).await;

    let err = fleet.errors.recv().await.unwrap();
    assert!(matches!(err, FleetError::Connection { ref domain, .. } if domain == "broken"));
    assert_eq!(handle.state(), CoordinatorState::Running);

    // Each refresh tick retries "broken" before refreshing "a".
    db.set_failing(true);
    let err = loop {
        let err = fleet.errors.recv().await.unwrap();
        if !matches!(err, FleetError::Connection { ref domain, .. } if domain == "broken") {
            break err;
        }
    };
    assert!(matches!(err, FleetError::Connection { ref domain, .. } if domain == "a"));
    assert_eq!(handle.state(), CoordinatorState::Running);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn closed_source_keeps_supervising() {
    let fleet = TestFleet::new();
    let (tx, rx) = watch::channel(DomainMap::new());
    let handle = fleet.coordinator(fast_config()).start(rx).await;
    drop(tx);

    fleet
        .workers
        .register("W1", "http://w1", ["go"], Duration::from_secs(1));
    sleep(Duration::from_secs(3)).await;

    assert!(fleet.workers.is_empty());
    assert_eq!(handle.state(), CoordinatorState::Running);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_token_stops_the_loop() {
    let fleet = TestFleet::new();
    let (_tx, rx) = watch::channel(DomainMap::new());
    let handle = fleet.coordinator(fast_config()).start(rx).await;
    let mut state = handle.subscribe();

    handle.cancel_token().cancel();
    state
        .wait_for(|s| *s == CoordinatorState::Stopped)
        .await
        .unwrap();
    handle.shutdown().await.unwrap();
}
