//! File-backed domain configuration with change notification.
//!
//! The domain file is YAML (or TOML when the extension is `.toml`) with a
//! top-level `domains` table mapping domain names to database URIs:
//!
//! ```yaml
//! domains:
//!   tenant-a: postgres://db-a/selfhost
//!   tenant-b: postgres://db-b/selfhost
//! ```

use figment::providers::{Format, Toml, Yaml};
use figment::Figment;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::DomainMap;
use crate::error::{FleetError, FleetResult};
use crate::report::ErrorReporter;

#[derive(Debug, Deserialize)]
struct DomainFile {
    #[serde(default)]
    domains: DomainMap,
}

/// Reads the domain mapping from `path`.
///
/// A missing or blank file is an error rather than an empty mapping, so a
/// half-written file never removes every domain.
pub fn load_domain_file(path: &Path) -> FleetResult<DomainMap> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(FleetError::config(format!(
            "domain file {} is empty",
            path.display()
        )));
    }

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::from(Toml::string(&content)),
        _ => Figment::from(Yaml::string(&content)),
    };

    let file: DomainFile = figment
        .extract()
        .map_err(|e| FleetError::config(format!("{}: {e}", path.display())))?;
    Ok(file.domains)
}

/// Publishes `domains` if it differs from the current mapping.
///
/// Returns true if subscribers were notified.
pub fn publish(updates: &watch::Sender<DomainMap>, domains: DomainMap) -> bool {
    updates.send_if_modified(|current| {
        if *current == domains {
            false
        } else {
            *current = domains;
            true
        }
    })
}

/// Watches a domain file and publishes every changed mapping.
///
/// The watch stops when this value is dropped.
pub struct DomainFileWatcher {
    path: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl DomainFileWatcher {
    /// Starts watching `path`.
    ///
    /// The parent directory is watched so that editors replacing the file
    /// are picked up. Read and parse failures are reported and the previous
    /// mapping stays published.
    pub fn spawn(
        path: impl Into<PathBuf>,
        debounce: Duration,
        updates: watch::Sender<DomainMap>,
        reporter: ErrorReporter,
    ) -> FleetResult<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| FleetError::config(format!("{} is not a file", path.display())))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let target = path.clone();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events
                        .iter()
                        .any(|e| e.path.file_name() == Some(file_name.as_os_str()));
                    if !touched {
                        return;
                    }
                    match load_domain_file(&target) {
                        Ok(domains) => {
                            if publish(&updates, domains) {
                                info!(path = %target.display(), "Domain file changed");
                            } else {
                                debug!(path = %target.display(), "Domain file touched without changes");
                            }
                        }
                        Err(e) => reporter.report(e),
                    }
                }
                Err(e) => reporter.report(FleetError::Watch(e)),
            }
        })?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Watching domain file");

        Ok(Self {
            path,
            _debouncer: debouncer,
        })
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DomainFileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainFileWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
