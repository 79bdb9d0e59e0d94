//! The fleet coordinator: one supervising task for the whole fleet.
//!
//! The coordinator evicts dead workers on the sweep interval and reconciles
//! domains whenever the domain source publishes a new mapping. On the refresh
//! interval it reconciles against the latest mapping again, which retries
//! domains that failed to connect, and then refreshes the program cache.
//! Refreshes and reconciles run as their own tasks so a slow database never
//! delays a sweep.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::ProgramCache;
use crate::config::CoordinatorConfig;
use crate::domain::{DomainMap, DomainRegistry};
use crate::error::{FleetError, FleetResult};
use crate::registry::{Worker, WorkerRegistry};
use crate::report::ErrorReporter;

/// Lifecycle state of a running coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Timers and configuration changes are being processed.
    Running,
    /// Cancellation observed; in-flight work is finishing.
    Stopping,
    /// The supervising task has exited.
    Stopped,
}

/// Supervises worker liveness, the program cache and the domain set.
#[derive(Debug)]
pub struct FleetCoordinator {
    config: CoordinatorConfig,
    workers: Arc<WorkerRegistry>,
    domains: Arc<DomainRegistry>,
    cache: Arc<ProgramCache>,
    reporter: ErrorReporter,
}

impl FleetCoordinator {
    /// Creates a coordinator over the given registries.
    ///
    /// Fails only if `config` is invalid.
    pub fn new(
        config: CoordinatorConfig,
        workers: Arc<WorkerRegistry>,
        domains: Arc<DomainRegistry>,
        cache: Arc<ProgramCache>,
        reporter: ErrorReporter,
    ) -> FleetResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            workers,
            domains,
            cache,
            reporter,
        })
    }

    /// Applies the current mapping, fills the cache and starts supervising.
    ///
    /// Returns once the initial reconcile and refresh have completed. Their
    /// failures are reported, not returned.
    pub async fn start(self, mut updates: watch::Receiver<DomainMap>) -> CoordinatorHandle {
        let initial = updates.borrow_and_update().clone();
        reconcile(&self.domains, &self.reporter, &initial).await;
        refresh(&self.domains, &self.cache, &self.reporter).await;

        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Running);
        let join = tokio::spawn(self.run(updates, cancel.clone(), state_tx));

        CoordinatorHandle {
            cancel,
            state: state_rx,
            join,
        }
    }

    /// Evicts every worker that has missed its deadline.
    pub fn sweep(&self) -> Vec<Worker> {
        let evicted = self.workers.clear_inactive();
        for worker in &evicted {
            info!(worker_id = %worker.id, uri = %worker.uri, "Worker evicted");
        }
        evicted
    }

    async fn run(
        self,
        mut updates: watch::Receiver<DomainMap>,
        cancel: CancellationToken,
        state: watch::Sender<CoordinatorState>,
    ) {
        let now = Instant::now();
        let mut sweep_timer =
            interval_at(now + self.config.sweep_interval, self.config.sweep_interval);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_timer =
            interval_at(now + self.config.refresh_interval, self.config.refresh_interval);
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut refresh_task: Option<JoinHandle<()>> = None;
        let mut reconcile_task: Option<JoinHandle<()>> = None;
        let mut updates_open = true;

        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            refresh_interval_secs = self.config.refresh_interval.as_secs(),
            "Fleet coordinator started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                _ = sweep_timer.tick() => {
                    self.sweep();
                }

                _ = refresh_timer.tick() => {
                    if refresh_task.is_some() {
                        debug!("Program refresh still running, skipping tick");
                    } else {
                        let desired = updates.borrow().clone();
                        refresh_task = Some(self.spawn_refresh(desired));
                    }
                }

                () = join_task(&mut refresh_task), if refresh_task.is_some() => {
                    refresh_task = None;
                }

                changed = updates.changed(), if updates_open && reconcile_task.is_none() => {
                    match changed {
                        Ok(()) => {
                            let desired = updates.borrow_and_update().clone();
                            reconcile_task = Some(self.spawn_reconcile(desired));
                        }
                        Err(_) => {
                            debug!("Domain source closed, keeping current domains");
                            updates_open = false;
                        }
                    }
                }

                () = join_task(&mut reconcile_task), if reconcile_task.is_some() => {
                    reconcile_task = None;
                }
            }
        }

        state.send_replace(CoordinatorState::Stopping);
        info!("Fleet coordinator stopping");

        for mut task in [refresh_task.take(), reconcile_task.take()] {
            join_task(&mut task).await;
        }

        state.send_replace(CoordinatorState::Stopped);
        info!("Fleet coordinator stopped");
    }

    fn spawn_refresh(&self, desired: DomainMap) -> JoinHandle<()> {
        let domains = Arc::clone(&self.domains);
        let cache = Arc::clone(&self.cache);
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            // Failed domains are absent from the registry, so this retries them.
            reconcile(&domains, &reporter, &desired).await;
            refresh(&domains, &cache, &reporter).await;
        })
    }

    fn spawn_reconcile(&self, desired: DomainMap) -> JoinHandle<()> {
        let domains = Arc::clone(&self.domains);
        let cache = Arc::clone(&self.cache);
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            if reconcile(&domains, &reporter, &desired).await {
                refresh(&domains, &cache, &reporter).await;
            }
        })
    }
}

async fn refresh(domains: &DomainRegistry, cache: &ProgramCache, reporter: &ErrorReporter) {
    let outcome = cache.refresh(domains).await;
    reporter.report_all(outcome.errors);
}

/// Reconciles domains. Returns true if the active domain set changed.
async fn reconcile(
    domains: &DomainRegistry,
    reporter: &ErrorReporter,
    desired: &DomainMap,
) -> bool {
    let report = domains.reconcile(desired).await;
    let changed =
        !(report.added.is_empty() && report.updated.is_empty() && report.removed.is_empty());
    reporter.report_all(report.failed.into_iter().map(|(_, e)| e));
    changed
}

async fn join_task(task: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = task {
        if let Err(e) = handle.await {
            error!(error = %e, "Coordinator task failed");
        }
    }
}

/// Controls a started coordinator.
#[derive(Debug)]
pub struct CoordinatorHandle {
    cancel: CancellationToken,
    state: watch::Receiver<CoordinatorState>,
    join: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Returns the current lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.clone()
    }

    /// Token that stops the coordinator when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the coordinator and waits for in-flight work to finish.
    pub async fn shutdown(self) -> FleetResult<()> {
        self.cancel.cancel();
        self.join
            .await
            .map_err(|e| FleetError::Internal(format!("coordinator task failed: {e}")))
    }
}
