//! Program cache: a periodically refreshed snapshot of program metadata.
//!
//! Lookups read the latest snapshot without locking. A refresh builds a new
//! snapshot from every active domain and swaps it in whole, so readers see
//! either the old or the new snapshot and never a mix.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::DomainRegistry;
use crate::error::{FleetError, FleetResult};
use crate::types::ProgramEntry;

/// Read-optimised cache of program metadata across all domains.
#[derive(Debug)]
pub struct ProgramCache {
    snapshot: ArcSwap<CacheSnapshot>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProgramCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(CacheSnapshot::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Rebuilds the cache from every active domain.
    ///
    /// Domains whose query fails keep their previous programs and report an
    /// error. Domains no longer active are dropped. Concurrent refreshes are
    /// serialised.
    pub async fn refresh(&self, domains: &DomainRegistry) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;
        let previous = self.snapshot.load_full();

        let queries = domains.connections().into_iter().map(|(name, conn)| async move {
            let result = conn.list_programs().await;
            (name, result)
        });
        let results = futures::future::join_all(queries).await;

        let mut outcome = RefreshOutcome::default();
        let mut next = HashMap::with_capacity(results.len());

        for (name, result) in results {
            match result {
                Ok(programs) => {
                    let programs: HashMap<Uuid, ProgramEntry> =
                        programs.into_iter().map(|p| (p.id, p)).collect();
                    debug!(domain = %name, programs = programs.len(), "Domain programs refreshed");
                    next.insert(
                        name,
                        DomainPrograms {
                            programs,
                            refreshed_at: Utc::now(),
                        },
                    );
                    outcome.refreshed += 1;
                }
                Err(e) => {
                    warn!(domain = %name, error = %e, "Program refresh failed, keeping stale entries");
                    if let Some(stale) = previous.domains.get(&name) {
                        next.insert(name, stale.clone());
                        outcome.stale += 1;
                    }
                    outcome.errors.push(e);
                }
            }
        }

        let snapshot = CacheSnapshot {
            generation: previous.generation + 1,
            domains: next,
        };
        outcome.programs = snapshot.len();
        self.snapshot.store(Arc::new(snapshot));

        info!(
            programs = outcome.programs,
            refreshed = outcome.refreshed,
            stale = outcome.stale,
            "Program cache refreshed"
        );
        outcome
    }

    /// Looks up a program in the latest snapshot.
    pub fn lookup(&self, domain: &str, id: Uuid) -> FleetResult<ProgramEntry> {
        self.snapshot
            .load()
            .get(domain, id)
            .cloned()
            .ok_or_else(|| FleetError::ProgramNotFound {
                domain: domain.to_owned(),
                id,
            })
    }

    /// Returns the latest snapshot.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.snapshot.load_full()
    }

    /// Lists executable programs written in `language`, across all domains.
    pub fn executable_for_language(&self, language: &str) -> Vec<ProgramEntry> {
        self.snapshot
            .load()
            .programs()
            .filter(|p| p.language == language && p.is_executable())
            .cloned()
            .collect()
    }

    /// Returns the number of cached programs.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Returns true if no programs are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable view of the cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Incremented on every refresh.
    pub generation: u64,
    domains: HashMap<String, DomainPrograms>,
}

impl CacheSnapshot {
    /// Gets a program by domain and id.
    pub fn get(&self, domain: &str, id: Uuid) -> Option<&ProgramEntry> {
        self.domains.get(domain)?.programs.get(&id)
    }

    /// Gets the cached programs of one domain.
    pub fn domain(&self, domain: &str) -> Option<&DomainPrograms> {
        self.domains.get(domain)
    }

    /// Iterates over every cached program.
    pub fn programs(&self) -> impl Iterator<Item = &ProgramEntry> {
        self.domains.values().flat_map(|d| d.programs.values())
    }

    /// Returns the number of cached programs.
    pub fn len(&self) -> usize {
        self.domains.values().map(|d| d.programs.len()).sum()
    }

    /// Returns true if no programs are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cached programs of one domain.
#[derive(Debug, Clone)]
pub struct DomainPrograms {
    /// Programs keyed by id.
    pub programs: HashMap<Uuid, ProgramEntry>,
    /// Wall-clock time of the last successful query.
    pub refreshed_at: DateTime<Utc>,
}

/// Result of a cache refresh.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Programs in the new snapshot.
    pub programs: usize,
    /// Domains queried successfully.
    pub refreshed: usize,
    /// Domains that failed and kept their previous entries.
    pub stale: usize,
    /// Per-domain failures.
    pub errors: Vec<FleetError>,
}
