//! In-memory domain store for testing.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FleetError, FleetResult};
use crate::types::ProgramEntry;

use super::{Connector, DomainConnection};

/// In-memory connector.
///
/// URIs resolve to databases added with [`MemoryConnector::add_database`];
/// any other URI fails to connect. Not suitable for production use as data
/// is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    databases: RwLock<HashMap<String, Arc<MemoryDomain>>>,
}

impl MemoryConnector {
    /// Creates a connector with no reachable databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `uri` reachable and returns its database.
    pub fn add_database(&self, uri: impl Into<String>) -> Arc<MemoryDomain> {
        let db = Arc::new(MemoryDomain::default());
        self.databases.write().insert(uri.into(), Arc::clone(&db));
        db
    }

    /// Makes `uri` unreachable. Already open handles keep working.
    pub fn remove_database(&self, uri: &str) -> Option<Arc<MemoryDomain>> {
        self.databases.write().remove(uri)
    }

    /// Gets the database behind `uri`.
    pub fn database(&self, uri: &str) -> Option<Arc<MemoryDomain>> {
        self.databases.read().get(uri).cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, domain: &str, uri: &str) -> FleetResult<Arc<dyn DomainConnection>> {
        let db = self
            .database(uri)
            .ok_or_else(|| FleetError::connection(domain, format!("database {uri} unreachable")))?;

        db.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryHandle {
            domain: domain.to_owned(),
            db,
            closed: AtomicBool::new(false),
        }))
    }
}

/// An in-memory database holding program rows.
#[derive(Debug, Default)]
pub struct MemoryDomain {
    programs: RwLock<Vec<ProgramEntry>>,
    failing: AtomicBool,
    query_delay: Mutex<Duration>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MemoryDomain {
    /// Replaces all program rows.
    pub fn set_programs(&self, programs: Vec<ProgramEntry>) {
        *self.programs.write() = programs;
    }

    /// Appends a program row.
    pub fn insert_program(&self, program: ProgramEntry) {
        self.programs.write().push(program);
    }

    /// Makes subsequent queries fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every query by `delay`.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = delay;
    }

    /// Number of handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.opened
            .load(Ordering::SeqCst)
            .saturating_sub(self.closed.load(Ordering::SeqCst))
    }

    /// Total number of handles ever opened.
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct MemoryHandle {
    domain: String,
    db: Arc<MemoryDomain>,
    closed: AtomicBool,
}

#[async_trait]
impl DomainConnection for MemoryHandle {
    async fn list_programs(&self) -> FleetResult<Vec<ProgramEntry>> {
        let delay = *self.db.query_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(FleetError::connection(&self.domain, "handle closed"));
        }
        if self.db.failing.load(Ordering::SeqCst) {
            return Err(FleetError::connection(&self.domain, "query failed"));
        }

        Ok(self
            .db
            .programs
            .read()
            .iter()
            .cloned()
            .map(|mut p| {
                p.domain.clone_from(&self.domain);
                p
            })
            .collect())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
