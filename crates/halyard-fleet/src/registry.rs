//! Worker registry for tracking live execution workers.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::dispatch::least_loaded;
use crate::error::{FleetError, FleetResult};

/// Unique worker identifier.
pub type WorkerId = String;

/// Worker registry.
///
/// All reads and writes go through a single lock over an ordered map, so a
/// sweep, a heartbeat and a dispatch selection never observe each other
/// half-applied. Iteration order is identity order.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<BTreeMap<WorkerId, Worker>>,
}

impl WorkerRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a worker, replacing any existing entry with the same id.
    pub fn register<L, S>(
        &self,
        id: impl Into<WorkerId>,
        uri: impl Into<String>,
        languages: L,
        timeout: Duration,
    ) -> Worker
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let worker = Worker::new(id, uri, languages, timeout);
        let previous = self
            .workers
            .write()
            .insert(worker.id.clone(), worker.clone());

        if previous.is_some() {
            info!(worker_id = %worker.id, uri = %worker.uri, "Worker re-registered");
        } else {
            info!(
                worker_id = %worker.id,
                uri = %worker.uri,
                languages = ?worker.languages,
                "Worker registered"
            );
        }

        worker
    }

    /// Deregisters a worker.
    pub fn deregister(&self, worker_id: &str) -> FleetResult<Worker> {
        self.workers
            .write()
            .remove(worker_id)
            .ok_or_else(|| FleetError::WorkerNotFound(worker_id.to_owned()))
    }

    /// Gets a worker by ID.
    pub fn get(&self, worker_id: &str) -> Option<Worker> {
        self.workers.read().get(worker_id).cloned()
    }

    /// Updates a worker's load from a heartbeat and renews its liveness.
    ///
    /// Unknown workers are not re-registered implicitly.
    pub fn report_heartbeat(&self, worker_id: &str, load: u64) -> FleetResult<()> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| FleetError::WorkerNotFound(worker_id.to_owned()))?;

        worker.load = load;
        worker.last_seen = Instant::now();
        Ok(())
    }

    /// Removes every worker that is no longer alive and returns them.
    pub fn clear_inactive(&self) -> Vec<Worker> {
        self.clear_inactive_at(Instant::now())
    }

    /// Removes every worker not alive at `now` and returns them.
    ///
    /// The alive check and the removal happen under one write lock.
    pub fn clear_inactive_at(&self, now: Instant) -> Vec<Worker> {
        let mut workers = self.workers.write();
        let expired: Vec<WorkerId> = workers
            .values()
            .filter(|w| !w.alive_at(now))
            .map(|w| w.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| workers.remove(id))
            .collect()
    }

    /// Selects the least-loaded alive worker able to run `language`.
    pub fn select_for_dispatch(&self, language: &str) -> FleetResult<Worker> {
        self.select_for_dispatch_at(language, Instant::now())
    }

    /// Selects the least-loaded worker alive at `now` able to run `language`.
    ///
    /// Ties are broken by worker id.
    pub fn select_for_dispatch_at(&self, language: &str, now: Instant) -> FleetResult<Worker> {
        let workers = self.workers.read();
        least_loaded(eligible(workers.values(), language, now))
            .cloned()
            .ok_or_else(|| FleetError::DispatchUnavailable {
                language: language.to_owned(),
            })
    }

    /// Selects a worker for `language` and charges it one unit of load.
    ///
    /// Selection and the load increment happen under the same lock, so two
    /// concurrent acquisitions see each other's load.
    pub fn acquire(&self, language: &str) -> FleetResult<Worker> {
        let now = Instant::now();
        let mut workers = self.workers.write();
        let selected = least_loaded(eligible(workers.values(), language, now))
            .map(|w| w.id.clone())
            .ok_or_else(|| FleetError::DispatchUnavailable {
                language: language.to_owned(),
            })?;

        let worker = workers
            .get_mut(&selected)
            .ok_or_else(|| FleetError::Internal(format!("selected worker {selected} vanished")))?;
        worker.load = worker.load.saturating_add(1);
        debug!(worker_id = %worker.id, load = worker.load, language, "Worker acquired");
        Ok(worker.clone())
    }

    /// Releases one unit of load after a dispatch completes.
    pub fn release(&self, worker_id: &str) -> FleetResult<u64> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| FleetError::WorkerNotFound(worker_id.to_owned()))?;

        worker.load = worker.load.saturating_sub(1);
        Ok(worker.load)
    }

    /// Lists all workers in identity order.
    pub fn list_all(&self) -> Vec<Worker> {
        self.workers.read().values().cloned().collect()
    }

    /// Returns the sum of all workers' load.
    pub fn total_load(&self) -> u64 {
        self.workers
            .read()
            .values()
            .fold(0u64, |acc, w| acc.saturating_add(w.load))
    }

    /// Returns the number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    /// Returns true if no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }
}

fn eligible<'a>(
    workers: impl Iterator<Item = &'a Worker> + 'a,
    language: &'a str,
    now: Instant,
) -> impl Iterator<Item = &'a Worker> + 'a {
    workers.filter(move |w| w.alive_at(now) && w.can_run(language))
}

/// A registered execution worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    /// Unique worker identifier.
    pub id: WorkerId,
    /// Endpoint URI that accepts dispatched work.
    pub uri: String,
    /// Languages this worker can execute.
    pub languages: BTreeSet<String>,
    load: u64,
    timeout: Duration,
    last_seen: Instant,
    registered_at: Instant,
}

impl Worker {
    /// Creates a worker last seen now.
    pub fn new<L, S>(
        id: impl Into<WorkerId>,
        uri: impl Into<String>,
        languages: L,
        timeout: Duration,
    ) -> Self
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Instant::now();
        Self {
            id: id.into(),
            uri: uri.into(),
            languages: languages.into_iter().map(Into::into).collect(),
            load: 0,
            timeout,
            last_seen: now,
            registered_at: now,
        }
    }

    /// Current outstanding work.
    #[must_use]
    pub const fn load(&self) -> u64 {
        self.load
    }

    /// Liveness timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time of the last registration or heartbeat.
    #[must_use]
    pub const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time the worker registered.
    #[must_use]
    pub const fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Instant after which the worker is considered dead.
    ///
    /// `None` when the timeout is too large to represent, i.e. never.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.last_seen.checked_add(self.timeout)
    }

    /// Returns true while the liveness deadline has not been reached.
    #[must_use]
    pub fn alive(&self) -> bool {
        self.alive_at(Instant::now())
    }

    /// Returns true if `now` is strictly before the liveness deadline.
    #[must_use]
    pub fn alive_at(&self, now: Instant) -> bool {
        self.deadline().map_or(true, |deadline| now < deadline)
    }

    /// Returns true if the worker declares `language`.
    #[must_use]
    pub fn can_run(&self, language: &str) -> bool {
        self.languages.contains(language)
    }
}
