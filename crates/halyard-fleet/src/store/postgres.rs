//! PostgreSQL domain store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{FleetError, FleetResult};
use crate::types::{ProgramEntry, ProgramState, ProgramType};

use super::{Connector, DomainConnection};

const LIST_PROGRAMS: &str = r#"
    SELECT p.uuid, p.name, p.type, p.state, p.schedule, p.deadline, p.language,
           (SELECT MAX(r.revision)
              FROM program_code_revisions r
             WHERE r.program_uuid = p.uuid
               AND r.signed IS NOT NULL) AS revision
      FROM programs p
"#;

/// Opens a PostgreSQL pool per domain.
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_connections: u32,
    connect_timeout: Duration,
}

impl PgConnector {
    /// Creates a connector from the database configuration.
    #[must_use]
    pub const fn new(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            connect_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, domain: &str, uri: &str) -> FleetResult<Arc<dyn DomainConnection>> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .connect(uri)
            .await
            .map_err(|e| FleetError::connection(domain, e))?;

        debug!(domain, "Opened domain pool");
        Ok(Arc::new(PgDomain::from_pool(domain, pool)))
    }
}

/// PostgreSQL-backed domain store.
#[derive(Clone)]
pub struct PgDomain {
    domain: String,
    pool: PgPool,
}

impl PgDomain {
    /// Wraps an existing pool.
    pub fn from_pool(domain: impl Into<String>, pool: PgPool) -> Self {
        Self {
            domain: domain.into(),
            pool,
        }
    }

    fn row_to_entry(&self, row: &PgRow) -> FleetResult<ProgramEntry> {
        let id: Uuid = row.try_get("uuid")?;
        let program_type: String = row.try_get("type")?;
        let state: String = row.try_get("state")?;
        let deadline: i32 = row.try_get("deadline")?;

        let program_type: ProgramType = program_type
            .parse()
            .map_err(|e| FleetError::Serialisation(format!("program {id}: {e}")))?;
        let state: ProgramState = state
            .parse()
            .map_err(|e| FleetError::Serialisation(format!("program {id}: {e}")))?;

        Ok(ProgramEntry {
            domain: self.domain.clone(),
            id,
            name: row.try_get("name")?,
            program_type,
            state,
            language: row.try_get("language")?,
            schedule: row.try_get("schedule")?,
            deadline: Duration::from_millis(u64::try_from(deadline).unwrap_or(0)),
            revision: row.try_get("revision")?,
        })
    }
}

#[async_trait]
impl DomainConnection for PgDomain {
    async fn list_programs(&self) -> FleetResult<Vec<ProgramEntry>> {
        let rows = sqlx::query(LIST_PROGRAMS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FleetError::connection(&self.domain, e))?;

        rows.iter().map(|row| self.row_to_entry(row)).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(domain = %self.domain, "Closed domain pool");
    }
}

impl std::fmt::Debug for PgDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDomain")
            .field("domain", &self.domain)
            .field("closed", &self.pool.is_closed())
            .finish_non_exhaustive()
    }
}
