//! Common test utilities for fleet integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod fixtures;

use axum::Router;
use halyard_fleet::{
    api::{self, AppState},
    error_channel, CoordinatorConfig, Dispatcher, DomainRegistry, ErrorReporter, FleetCoordinator,
    FleetError, MemoryConnector, ProgramCache, WorkerRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Complete test fleet with all components wired to an in-memory store.
pub struct TestFleet {
    pub connector: Arc<MemoryConnector>,
    pub workers: Arc<WorkerRegistry>,
    pub domains: Arc<DomainRegistry>,
    pub cache: Arc<ProgramCache>,
    pub reporter: ErrorReporter,
    pub errors: mpsc::Receiver<FleetError>,
    pub app_state: Arc<AppState>,
}

impl TestFleet {
    /// Creates a new test fleet with an error channel of capacity 16.
    pub fn new() -> Self {
        Self::with_error_capacity(16)
    }

    /// Creates a new test fleet with a custom error channel capacity.
    pub fn with_error_capacity(capacity: usize) -> Self {
        let connector = Arc::new(MemoryConnector::new());
        let workers = Arc::new(WorkerRegistry::new());
        let domains = Arc::new(DomainRegistry::new(connector.clone()));
        let cache = Arc::new(ProgramCache::new());
        let (reporter, errors) = error_channel(capacity);

        let app_state = Arc::new(AppState {
            workers: workers.clone(),
            domains: domains.clone(),
            cache: cache.clone(),
            dispatcher: Dispatcher::new(workers.clone(), cache.clone()),
            reporter: reporter.clone(),
            default_timeout: Duration::from_secs(15),
        });

        Self {
            connector,
            workers,
            domains,
            cache,
            reporter,
            errors,
            app_state,
        }
    }

    /// Builds a coordinator over this fleet's registries.
    pub fn coordinator(&self, config: CoordinatorConfig) -> FleetCoordinator {
        FleetCoordinator::new(
            config,
            self.workers.clone(),
            self.domains.clone(),
            self.cache.clone(),
            self.reporter.clone(),
        )
        .unwrap()
    }

    /// Builds the API router over this fleet.
    pub fn router(&self) -> Router {
        api::router(self.app_state.clone())
    }
}

impl Default for TestFleet {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator configuration with short cadences for time-driven tests.
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        sweep_interval: Duration::from_secs(1),
        refresh_interval: Duration::from_secs(10),
        error_channel_capacity: 16,
    }
}

/// Polls `condition` until it holds, yielding to spawned tasks in between.
///
/// Panics after 200 attempts.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
