//! Dispatch: choosing a worker for a program.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::cache::ProgramCache;
use crate::error::{FleetError, FleetResult};
use crate::registry::{Worker, WorkerId, WorkerRegistry};
use crate::types::ProgramEntry;

/// Picks the worker with the lowest load, breaking ties by id.
///
/// Returns `None` if `workers` is empty.
pub fn least_loaded<'a>(workers: impl IntoIterator<Item = &'a Worker>) -> Option<&'a Worker> {
    workers
        .into_iter()
        .min_by(|a, b| a.load().cmp(&b.load()).then_with(|| a.id.cmp(&b.id)))
}

/// Routes cached programs to live workers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: Arc<WorkerRegistry>,
    cache: Arc<ProgramCache>,
}

impl Dispatcher {
    /// Creates a dispatcher over a worker registry and a program cache.
    pub const fn new(workers: Arc<WorkerRegistry>, cache: Arc<ProgramCache>) -> Self {
        Self { workers, cache }
    }

    /// Assigns a program to the least-loaded capable worker.
    ///
    /// The chosen worker is charged one unit of load until
    /// [`Dispatcher::complete`] is called for it.
    pub fn assign(&self, domain: &str, program_id: Uuid) -> FleetResult<Assignment> {
        let program = self.cache.lookup(domain, program_id)?;
        if !program.is_executable() {
            return Err(FleetError::ProgramNotExecutable { id: program_id });
        }

        let worker = self.workers.acquire(&program.language)?;
        debug!(
            domain,
            program_id = %program_id,
            worker_id = %worker.id,
            "Program assigned"
        );

        Ok(Assignment {
            worker_id: worker.id,
            worker_uri: worker.uri,
            program,
        })
    }

    /// Records completion of work previously assigned to `worker_id`.
    pub fn complete(&self, worker_id: &str) -> FleetResult<u64> {
        self.workers.release(worker_id)
    }
}

/// A program routed to a worker.
#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    /// Worker that should run the program.
    pub worker_id: WorkerId,
    /// Endpoint to send the program to.
    pub worker_uri: String,
    /// Program metadata at assignment time.
    pub program: ProgramEntry,
}
