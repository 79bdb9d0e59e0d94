//! Authoritative program stores, one per domain.
//!
//! A [`Connector`] opens a [`DomainConnection`] for a domain's URI. The
//! domain registry owns every connection it opens and closes it when the
//! domain is removed or its URI changes. The primary implementation uses
//! PostgreSQL; an in-memory implementation is provided for testing.

mod memory;
mod postgres;

pub use memory::{MemoryConnector, MemoryDomain};
pub use postgres::{PgConnector, PgDomain};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::FleetResult;
use crate::types::ProgramEntry;

/// An open handle to one domain's store.
#[async_trait]
pub trait DomainConnection: std::fmt::Debug + Send + Sync {
    /// Lists all programs in the domain with their latest signed revision.
    async fn list_programs(&self) -> FleetResult<Vec<ProgramEntry>>;

    /// Closes the handle. Subsequent queries fail.
    async fn close(&self);
}

/// Opens domain connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens and validates a connection for `domain` at `uri`.
    ///
    /// Fails with [`crate::FleetError::Connection`] if the store is unreachable.
    async fn connect(&self, domain: &str, uri: &str) -> FleetResult<Arc<dyn DomainConnection>>;
}
