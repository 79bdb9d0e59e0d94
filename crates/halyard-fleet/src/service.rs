//! Service lifecycle management.
//!
//! Wires the registries, the domain source, the coordinator and the HTTP API
//! together, and tears them down in order on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::{self, AppState};
use crate::cache::ProgramCache;
use crate::config::FleetConfig;
use crate::coordinator::FleetCoordinator;
use crate::dispatch::Dispatcher;
use crate::domain::{DomainMap, DomainRegistry};
use crate::error::{FleetError, FleetResult};
use crate::registry::WorkerRegistry;
use crate::report::error_channel;
use crate::source::{load_domain_file, DomainFileWatcher};
use crate::store::{Connector, PgConnector};

/// The fleet service.
pub struct FleetService {
    config: FleetConfig,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
}

impl FleetService {
    /// Creates a service that connects to domains over PostgreSQL.
    #[must_use]
    pub fn new(config: FleetConfig) -> Self {
        let connector = Arc::new(PgConnector::new(&config.database));
        Self::with_connector(config, connector)
    }

    /// Creates a service with a custom domain connector.
    #[must_use]
    pub fn with_connector(config: FleetConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            cancel: CancellationToken::new(),
        }
    }

    /// Runs the service until a shutdown signal arrives.
    ///
    /// Startup fails if the configuration is invalid, the listen address
    /// cannot be bound or the domain file cannot be read. Nothing is left
    /// running after a failed startup. Everything after startup is reported
    /// and survived.
    pub async fn run(&self) -> FleetResult<()> {
        self.config.validate()?;

        let (initial, file) = self.initial_domains()?;
        info!(domains = initial.len(), "Initial domain mapping loaded");

        let listener = tokio::net::TcpListener::bind(self.config.api.listen_addr).await?;
        info!(addr = %self.config.api.listen_addr, "Fleet API listening");

        let workers = Arc::new(WorkerRegistry::new());
        let domains = Arc::new(DomainRegistry::new(Arc::clone(&self.connector)));
        let cache = Arc::new(ProgramCache::new());
        let (reporter, errors) = error_channel(self.config.coordinator.error_channel_capacity);
        let (updates_tx, updates_rx) = watch::channel(initial);

        let watcher = match file {
            Some(path) if self.config.domains.watch => Some(DomainFileWatcher::spawn(
                path,
                self.config.domains.debounce(),
                updates_tx.clone(),
                reporter.clone(),
            )?),
            _ => None,
        };

        let coordinator = FleetCoordinator::new(
            self.config.coordinator.clone(),
            Arc::clone(&workers),
            Arc::clone(&domains),
            Arc::clone(&cache),
            reporter.clone(),
        )?;

        // No early returns past this point: domains opened by the coordinator
        // are closed below.
        let drain = tokio::spawn(drain_errors(errors));
        let handle = coordinator.start(updates_rx).await;

        let state = Arc::new(AppState {
            dispatcher: Dispatcher::new(Arc::clone(&workers), Arc::clone(&cache)),
            workers,
            domains: Arc::clone(&domains),
            cache,
            reporter: reporter.clone(),
            default_timeout: self.config.workers.default_timeout,
        });
        let app = api::router(state);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await;

        drop(watcher);
        let stopped = handle.shutdown().await;
        domains.close_all().await;

        drop(updates_tx);
        drop(reporter);
        if let Err(e) = drain.await {
            error!(error = %e, "Error drain task failed");
        }

        served.map_err(|e| FleetError::Internal(format!("server error: {e}")))?;
        stopped?;
        info!("Fleet service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Returns the initial mapping and, if file-backed, the file to watch.
    fn initial_domains(&self) -> FleetResult<(DomainMap, Option<PathBuf>)> {
        match self.config.domains.resolve_file() {
            Some(path) => {
                let domains = load_domain_file(&path)?;
                if !self.config.domains.inline.is_empty() {
                    info!(path = %path.display(), "Domain file set, ignoring inline domains");
                }
                Ok((domains, Some(path)))
            }
            None => Ok((self.config.domains.inline.clone(), None)),
        }
    }
}

/// Consumes the error channel until every reporter is gone.
async fn drain_errors(mut errors: mpsc::Receiver<FleetError>) {
    let mut received = 0u64;
    while let Some(e) = errors.recv().await {
        received += 1;
        debug!(error = %e, received, "Fleet error received");
    }
    debug!(received, "Error channel closed");
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("Shutdown requested");
        }
    }
}
