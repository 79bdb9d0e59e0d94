//! Domain registry: tenant name to open database handle.
//!
//! Handles are opened outside the lock and swapped in atomically, so a
//! reader either sees the old handle or the new one. Displaced handles are
//! closed after the swap.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{FleetError, FleetResult};
use crate::store::{Connector, DomainConnection};

/// Desired mapping of domain name to database URI.
pub type DomainMap = BTreeMap<String, String>;

/// Registry of active domains and their database handles.
pub struct DomainRegistry {
    connector: Arc<dyn Connector>,
    domains: RwLock<HashMap<String, DomainEntry>>,
    reconcile_lock: tokio::sync::Mutex<()>,
}

struct DomainEntry {
    uri: String,
    connection: Arc<dyn DomainConnection>,
}

impl DomainRegistry {
    /// Creates an empty registry that opens handles with `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            domains: RwLock::new(HashMap::new()),
            reconcile_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Installs a handle for `domain` at `uri`.
    ///
    /// An identical URI keeps the installed handle. On connection failure
    /// the previous handle, if any, stays installed.
    pub async fn add_or_update(&self, domain: &str, uri: &str) -> FleetResult<DomainChange> {
        if self.uri(domain).as_deref() == Some(uri) {
            debug!(domain, "Domain unchanged");
            return Ok(DomainChange::Unchanged);
        }

        let connection = self.connector.connect(domain, uri).await?;

        let displaced = self.domains.write().insert(
            domain.to_owned(),
            DomainEntry {
                uri: uri.to_owned(),
                connection,
            },
        );

        match displaced {
            Some(old) => {
                info!(domain, "Domain database updated");
                old.connection.close().await;
                Ok(DomainChange::Updated)
            }
            None => {
                info!(domain, "Domain database added");
                Ok(DomainChange::Added)
            }
        }
    }

    /// Removes and closes the handle for `domain`. No-op if absent.
    pub async fn remove(&self, domain: &str) {
        let removed = self.domains.write().remove(domain);
        match removed {
            Some(entry) => {
                entry.connection.close().await;
                info!(domain, "Domain database removed");
            }
            None => debug!(domain, "Domain not found for removal"),
        }
    }

    /// Snapshot of active domain names.
    pub fn list_domains(&self) -> BTreeSet<String> {
        self.domains.read().keys().cloned().collect()
    }

    /// Snapshot of active domains and their URIs.
    pub fn uris(&self) -> DomainMap {
        self.domains
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.uri.clone()))
            .collect()
    }

    /// Gets the URI installed for `domain`.
    pub fn uri(&self, domain: &str) -> Option<String> {
        self.domains.read().get(domain).map(|e| e.uri.clone())
    }

    /// Acquires the handle for `domain`.
    ///
    /// The handle is only valid until the next reconciliation; re-acquire
    /// by name instead of holding it.
    pub fn connection(&self, domain: &str) -> FleetResult<Arc<dyn DomainConnection>> {
        self.domains
            .read()
            .get(domain)
            .map(|e| Arc::clone(&e.connection))
            .ok_or_else(|| FleetError::DomainNotFound(domain.to_owned()))
    }

    /// Snapshot of every active domain's handle.
    pub fn connections(&self) -> Vec<(String, Arc<dyn DomainConnection>)> {
        self.domains
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.connection)))
            .collect()
    }

    /// Converges the active domains to `desired`.
    ///
    /// Removals are applied first. A domain that fails to connect keeps its
    /// previous state and is reported in [`ReconcileReport::failed`]; the
    /// remaining domains are still reconciled.
    pub async fn reconcile(&self, desired: &DomainMap) -> ReconcileReport {
        let _guard = self.reconcile_lock.lock().await;
        let plan = plan(&self.uris(), desired);
        let mut report = ReconcileReport {
            unchanged: plan.unchanged.len(),
            ..ReconcileReport::default()
        };

        for domain in &plan.removals {
            self.remove(domain).await;
            report.removed.push(domain.clone());
        }

        let changes = plan.additions.iter().chain(plan.updates.iter());
        for (domain, uri) in changes {
            match self.add_or_update(domain, uri).await {
                Ok(DomainChange::Added) => report.added.push(domain.clone()),
                Ok(DomainChange::Updated) => report.updated.push(domain.clone()),
                Ok(DomainChange::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Failed to install domain");
                    report.failed.push((domain.clone(), e));
                }
            }
        }

        if report.added.is_empty()
            && report.updated.is_empty()
            && report.removed.is_empty()
            && report.failed.is_empty()
        {
            debug!(unchanged = report.unchanged, "Domains already reconciled");
        } else {
            info!(
                added = report.added.len(),
                updated = report.updated.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Domains reconciled"
            );
        }
        report
    }

    /// Closes and removes every domain.
    pub async fn close_all(&self) {
        let drained: Vec<(String, DomainEntry)> = self.domains.write().drain().collect();
        for (domain, entry) in drained {
            entry.connection.close().await;
            debug!(domain = %domain, "Domain database closed");
        }
    }

    /// Returns the number of active domains.
    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    /// Returns true if no domains are active.
    pub fn is_empty(&self) -> bool {
        self.domains.read().is_empty()
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.list_domains())
            .finish_non_exhaustive()
    }
}

/// Outcome of a single [`DomainRegistry::add_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainChange {
    /// A new domain was installed.
    Added,
    /// The domain's URI changed and its handle was replaced.
    Updated,
    /// The domain already had this URI.
    Unchanged,
}

/// Set difference between the active and desired domains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Active domains absent from the desired mapping.
    pub removals: Vec<String>,
    /// Desired domains not yet active.
    pub additions: Vec<(String, String)>,
    /// Active domains whose URI changed.
    pub updates: Vec<(String, String)>,
    /// Active domains with an identical URI.
    pub unchanged: Vec<String>,
}

impl ReconcilePlan {
    /// Returns true if applying the plan changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty() && self.updates.is_empty()
    }
}

/// Computes the changes needed to go from `current` to `desired`.
#[must_use]
pub fn plan(current: &DomainMap, desired: &DomainMap) -> ReconcilePlan {
    let removals = current
        .keys()
        .filter(|name| !desired.contains_key(*name))
        .cloned()
        .collect();

    let mut plan = ReconcilePlan {
        removals,
        ..ReconcilePlan::default()
    };

    for (name, uri) in desired {
        match current.get(name) {
            None => plan.additions.push((name.clone(), uri.clone())),
            Some(existing) if existing != uri => plan.updates.push((name.clone(), uri.clone())),
            Some(_) => plan.unchanged.push(name.clone()),
        }
    }

    plan
}

/// Result of a reconciliation.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Domains installed for the first time.
    pub added: Vec<String>,
    /// Domains whose handle was replaced.
    pub updated: Vec<String>,
    /// Domains removed and closed.
    pub removed: Vec<String>,
    /// Domains left untouched.
    pub unchanged: usize,
    /// Domains that could not be installed, with the cause.
    pub failed: Vec<(String, FleetError)>,
}

impl ReconcileReport {
    /// Returns true if every desired domain was installed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryConnector;

    fn map(pairs: &[(&str, &str)]) -> DomainMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn registry() -> (DomainRegistry, Arc<MemoryConnector>) {
        let connector = Arc::new(MemoryConnector::new());
        (DomainRegistry::new(connector.clone()), connector)
    }

    #[test]
    fn plan_computes_set_difference() {
        let current = map(&[("a", "uri-a"), ("b", "uri-b"), ("c", "uri-c")]);
        let desired = map(&[("b", "uri-b2"), ("c", "uri-c"), ("d", "uri-d")]);

        let plan = plan(&current, &desired);
        assert_eq!(plan.removals, vec!["a".to_owned()]);
        assert_eq!(plan.additions, vec![("d".to_owned(), "uri-d".to_owned())]);
        assert_eq!(plan.updates, vec![("b".to_owned(), "uri-b2".to_owned())]);
        assert_eq!(plan.unchanged, vec!["c".to_owned()]);
        assert!(!plan.is_noop());
    }

    #[test]
    fn plan_for_identical_maps_is_noop() {
        let current = map(&[("a", "uri-a")]);
        assert!(plan(&current, &current.clone()).is_noop());
        assert!(plan(&DomainMap::new(), &DomainMap::new()).is_noop());
    }

    #[test]
    fn plan_empty_desired_removes_everything() {
        let current = map(&[("a", "uri-a"), ("b", "uri-b")]);
        let plan = plan(&current, &DomainMap::new());
        assert_eq!(plan.removals.len(), 2);
        assert!(plan.additions.is_empty());
    }

    #[tokio::test]
    async fn add_update_and_remove() {
        let (registry, connector) = registry();
        let db1 = connector.add_database("memory://one");
        let db2 = connector.add_database("memory://two");

        let change = registry.add_or_update("a", "memory://one").await.unwrap();
        assert_eq!(change, DomainChange::Added);

        let change = registry.add_or_update("a", "memory://one").await.unwrap();
        assert_eq!(change, DomainChange::Unchanged);
        assert_eq!(db1.connections_opened(), 1);

        let change = registry.add_or_update("a", "memory://two").await.unwrap();
        assert_eq!(change, DomainChange::Updated);
        assert_eq!(db1.open_handles(), 0);
        assert_eq!(db2.open_handles(), 1);
        assert_eq!(registry.uri("a").as_deref(), Some("memory://two"));

        registry.remove("a").await;
        assert!(registry.is_empty());
        assert_eq!(db2.open_handles(), 0);

        // Removing an absent domain is a no-op
        registry.remove("a").await;
    }

    #[tokio::test]
    async fn failed_update_keeps_previous_handle() {
        let (registry, connector) = registry();
        let db = connector.add_database("memory://good");
        registry.add_or_update("a", "memory://good").await.unwrap();

        let result = registry.add_or_update("a", "memory://bad").await;
        assert!(matches!(result, Err(FleetError::Connection { .. })));
        assert_eq!(registry.uri("a").as_deref(), Some("memory://good"));
        assert_eq!(db.open_handles(), 1);
        assert!(registry.connection("a").is_ok());
    }

    #[tokio::test]
    async fn connection_for_unknown_domain() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.connection("nope"),
            Err(FleetError::DomainNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reconcile_reports_failures_individually() {
        let (registry, connector) = registry();
        connector.add_database("memory://a");
        connector.add_database("memory://c");

        let desired = map(&[("a", "memory://a"), ("b", "memory://bad"), ("c", "memory://c")]);
        let report = registry.reconcile(&desired).await;

        assert_eq!(report.added, vec!["a".to_owned(), "c".to_owned()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(!report.is_complete());
        assert_eq!(
            registry.list_domains(),
            ["a", "c"].into_iter().map(String::from).collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn close_all_closes_handles() {
        let (registry, connector) = registry();
        let db = connector.add_database("memory://a");
        registry.add_or_update("a", "memory://a").await.unwrap();
        registry.add_or_update("b", "memory://a").await.unwrap();
        assert_eq!(db.open_handles(), 2);

        registry.close_all().await;
        assert!(registry.is_empty());
        assert_eq!(db.open_handles(), 0);
    }
}
