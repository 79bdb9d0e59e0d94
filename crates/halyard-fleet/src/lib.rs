//! Halyard fleet coordinator: worker liveness, dispatch and program metadata.
//!
//! The coordinator is responsible for:
//!
//! - **Worker liveness**: workers register and heartbeat; workers that miss
//!   their deadline are evicted by a periodic sweep
//! - **Dispatch**: picking the least-loaded live worker for a language
//! - **Domains**: one database handle per tenant domain, reconciled against a
//!   watched configuration file without a restart
//! - **Program cache**: a periodically refreshed, lock-free snapshot of
//!   program metadata across all domains
//!
//! # Architecture
//!
//! A single supervising task ([`FleetCoordinator`]) multiplexes the sweep
//! timer, the refresh timer, configuration changes and cancellation. The
//! registries are plain shared objects, so the HTTP API reads them directly.
//! Background failures are sent over a bounded channel
//! ([`report::error_channel`]) and never stop the loop.
//!
//! # Example
//!
//! ```ignore
//! use halyard_fleet::{FleetConfig, FleetService};
//!
//! let config = FleetConfig::load()?;
//! FleetService::new(config).run().await?;
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod registry;
pub mod report;
pub mod service;
pub mod source;
pub mod store;
pub mod types;

// Re-export main types
pub use cache::{CacheSnapshot, ProgramCache, RefreshOutcome};
pub use config::{CoordinatorConfig, DomainsConfig, FleetConfig};
pub use coordinator::{CoordinatorHandle, CoordinatorState, FleetCoordinator};
pub use dispatch::{Assignment, Dispatcher};
pub use domain::{DomainChange, DomainMap, DomainRegistry, ReconcilePlan, ReconcileReport};
pub use error::{FleetError, FleetResult};
pub use registry::{Worker, WorkerId, WorkerRegistry};
pub use report::{error_channel, ErrorReporter};
pub use service::FleetService;
pub use source::{load_domain_file, DomainFileWatcher};
pub use store::{Connector, DomainConnection, MemoryConnector, MemoryDomain, PgConnector};
pub use types::{ProgramEntry, ProgramState, ProgramType};
