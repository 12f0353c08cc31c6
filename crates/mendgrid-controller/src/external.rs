//! External collaborators of a reconciliation pass.
//!
//! The pass never talks to the cluster directly: it asks whether an upgrade
//! is running, whether a legacy health check already covers its nodes, and
//! creates remediation handles through these traits. The store-backed
//! adapters below are what `mendd` wires in.

use std::sync::atomic::{AtomicBool, Ordering};

use mendgrid_core::{Node, RemediationRef};
use mendgrid_state::{RemediationRecord, StateStore};
use tracing::debug;

/// Reports whether a cluster-wide upgrade is in progress.
pub trait UpgradeChecker: Send + Sync {
    fn check(&self) -> anyhow::Result<bool>;
}

/// Reports whether an older-generation health check selects any of `nodes`.
///
/// Returns the name of the first overlapping check.
pub trait LegacyCheckDetector: Send + Sync {
    fn overlapping(&self, nodes: &[&Node]) -> anyhow::Result<Option<String>>;
}

/// Create, look up, and delete remediation handles.
pub trait RemediationClient: Send + Sync {
    /// Create the handle unless it already exists. Returns true if created.
    fn create(&self, record: &RemediationRecord) -> anyhow::Result<bool>;

    fn get(&self, reference: &RemediationRef) -> anyhow::Result<Option<RemediationRecord>>;

    fn delete(&self, reference: &RemediationRef) -> anyhow::Result<bool>;
}

// ── Store-backed adapters ──────────────────────────────────────────

/// Reads the cluster upgrade flag from the store.
#[derive(Clone)]
pub struct StoreUpgradeChecker {
    store: StateStore,
}

impl StoreUpgradeChecker {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl UpgradeChecker for StoreUpgradeChecker {
    fn check(&self) -> anyhow::Result<bool> {
        Ok(self.store.cluster_upgrading()?)
    }
}

/// Matches stored legacy health checks against a node set.
#[derive(Clone)]
pub struct StoreLegacyCheckDetector {
    store: StateStore,
}

impl StoreLegacyCheckDetector {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl LegacyCheckDetector for StoreLegacyCheckDetector {
    fn overlapping(&self, nodes: &[&Node]) -> anyhow::Result<Option<String>> {
        if nodes.is_empty() {
            return Ok(None);
        }
        for check in self.store.list_legacy_checks()? {
            let selector = match check.selector.compile() {
                Ok(selector) => selector,
                Err(e) => {
                    debug!(check = %check.table_key(), error = %e, "ignoring legacy check with malformed selector");
                    continue;
                }
            };
            if nodes.iter().any(|n| selector.matches(&n.labels)) {
                return Ok(Some(check.table_key()));
            }
        }
        Ok(None)
    }
}

/// Keeps remediation handles in the store for executors to pick up.
#[derive(Clone)]
pub struct StoreRemediationClient {
    store: StateStore,
}

impl StoreRemediationClient {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl RemediationClient for StoreRemediationClient {
    fn create(&self, record: &RemediationRecord) -> anyhow::Result<bool> {
        let (_, created) = self.store.create_remediation(record)?;
        Ok(created)
    }

    fn get(&self, reference: &RemediationRef) -> anyhow::Result<Option<RemediationRecord>> {
        Ok(self.store.get_remediation(reference)?)
    }

    fn delete(&self, reference: &RemediationRef) -> anyhow::Result<bool> {
        Ok(self.store.delete_remediation(reference)?)
    }
}

/// Upgrade checker with a fixed, settable answer.
#[derive(Debug, Default)]
pub struct StaticUpgradeChecker {
    upgrading: AtomicBool,
}

impl StaticUpgradeChecker {
    pub fn new(upgrading: bool) -> Self {
        Self {
            upgrading: AtomicBool::new(upgrading),
        }
    }

    pub fn set(&self, upgrading: bool) {
        self.upgrading.store(upgrading, Ordering::SeqCst);
    }
}

impl UpgradeChecker for StaticUpgradeChecker {
    fn check(&self) -> anyhow::Result<bool> {
        Ok(self.upgrading.load(Ordering::SeqCst))
    }
}
