//! StateStore — redb-backed object store for MendGrid.
//!
//! Provides typed CRUD over nodes, policies, legacy health checks,
//! remediation handles, and cluster flags. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use mendgrid_core::{
    LegacyHealthCheck, Node, NodeName, Policy, PolicyName, PolicySpec, PolicyStatus,
    RemediationRef, TemplateRef,
};

use crate::error::{StateError, StateResult};
use crate::events::StoreEvent;
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of the change feed. Slow subscribers see `Lagged` and resync.
const EVENT_CAPACITY: usize = 1024;

/// Cluster flag set while a cluster-wide upgrade is in progress.
const FLAG_UPGRADING: &str = "upgrading";

/// A remediation object created for a node, as seen by executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub reference: RemediationRef,
    pub node: NodeName,
    pub policy: PolicyName,
    pub template: TemplateRef,
    pub order: i32,
    /// Unix timestamp when the handle was created.
    pub created_at: u64,
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(LEGACY_CHECKS).map_err(map_err!(Table))?;
        txn.open_table(REMEDIATIONS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTER).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to the change feed.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine: nothing is watching yet.
        let _ = self.events.send(event);
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_value<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_values<T: DeserializeOwned>(
        &self,
        def: JsonTable,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    /// Insert `value`, returning the previous value under `key`.
    fn replace_value<T: Serialize + DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<Option<T>> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let previous = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let previous = table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
            match previous {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(previous)
    }

    /// Remove `key`, returning the removed value.
    fn remove_value<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let removed = table.remove(key).map_err(map_err!(Write))?;
            match removed {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        let old: Option<Node> = self.replace_value(NODES, &node.name, node)?;
        debug!(node = %node.name, created = old.is_none(), "node stored");
        self.publish(StoreEvent::Node {
            old: old.map(Box::new),
            new: Some(Box::new(node.clone())),
        });
        Ok(())
    }

    /// Get a node by name.
    pub fn get_node(&self, name: &str) -> StateResult<Option<Node>> {
        self.get_value(NODES, name)
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.list_values(NODES)
    }

    /// Delete a node by name. Returns true if it existed.
    pub fn delete_node(&self, name: &str) -> StateResult<bool> {
        let old: Option<Node> = self.remove_value(NODES, name)?;
        let existed = old.is_some();
        if existed {
            self.publish(StoreEvent::Node {
                old: old.map(Box::new),
                new: None,
            });
        }
        debug!(node = %name, existed, "node deleted");
        Ok(existed)
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Store a new policy. Fails if one with the same name exists.
    pub fn create_policy(&self, policy: &Policy) -> StateResult<Policy> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created = {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            if table.get(policy.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(policy.name.clone()));
            }
            let mut created = policy.clone();
            created.resource_version = 1;
            let bytes = serde_json::to_vec(&created).map_err(map_err!(Serialize))?;
            table
                .insert(created.name.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            created
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(policy = %created.name, "policy created");
        self.publish(StoreEvent::Policy {
            name: created.name.clone(),
        });
        Ok(created)
    }

    /// Get a policy by name.
    pub fn get_policy(&self, name: &str) -> StateResult<Option<Policy>> {
        self.get_value(POLICIES, name)
    }

    /// List all policies.
    pub fn list_policies(&self) -> StateResult<Vec<Policy>> {
        self.list_values(POLICIES)
    }

    /// Replace a policy's spec, keeping its status.
    ///
    /// With `expected_version` set, the write only succeeds if the stored
    /// policy is still at that version.
    pub fn update_policy_spec(
        &self,
        name: &str,
        spec: &PolicySpec,
        expected_version: Option<u64>,
    ) -> StateResult<Policy> {
        let updated = self.modify_policy(name, expected_version, |policy| {
            policy.spec = spec.clone();
        })?;
        debug!(policy = %name, version = updated.resource_version, "policy spec updated");
        self.publish(StoreEvent::Policy {
            name: name.to_string(),
        });
        Ok(updated)
    }

    /// Compare-and-swap the status of a policy.
    pub fn update_policy_status(
        &self,
        name: &str,
        expected_version: u64,
        status: &PolicyStatus,
    ) -> StateResult<Policy> {
        let updated = self.modify_policy(name, Some(expected_version), |policy| {
            policy.status = status.clone();
        })?;
        debug!(policy = %name, version = updated.resource_version, "policy status updated");
        self.publish(StoreEvent::PolicyStatus {
            name: name.to_string(),
        });
        Ok(updated)
    }

    fn modify_policy(
        &self,
        name: &str,
        expected_version: Option<u64>,
        mutate: impl FnOnce(&mut Policy),
    ) -> StateResult<Policy> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            let current: Policy = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => return Err(StateError::NotFound(name.to_string())),
            };
            if let Some(expected) = expected_version
                && expected != current.resource_version
            {
                return Err(StateError::Conflict {
                    key: name.to_string(),
                    expected,
                    actual: current.resource_version,
                });
            }
            let mut next = current;
            mutate(&mut next);
            next.resource_version += 1;
            let bytes = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(name, bytes.as_slice())
                .map_err(map_err!(Write))?;
            next
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Delete a policy by name. Returns true if it existed.
    ///
    /// With `expected_version` set, the policy is only removed if it is still
    /// at that version, so a status write that lands after the caller's read
    /// turns the delete into a conflict.
    pub fn delete_policy(&self, name: &str, expected_version: Option<u64>) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            let current: Option<Policy> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            };
            match (current, expected_version) {
                (None, _) => false,
                (Some(current), Some(expected)) if expected != current.resource_version => {
                    return Err(StateError::Conflict {
                        key: name.to_string(),
                        expected,
                        actual: current.resource_version,
                    });
                }
                (Some(_), _) => {
                    table.remove(name).map_err(map_err!(Write))?;
                    true
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if existed {
            self.publish(StoreEvent::Policy {
                name: name.to_string(),
            });
        }
        debug!(policy = %name, existed, "policy deleted");
        Ok(existed)
    }

    // ── Legacy health checks ───────────────────────────────────────

    /// Insert or update a legacy health check.
    pub fn put_legacy_check(&self, check: &LegacyHealthCheck) -> StateResult<()> {
        let _: Option<LegacyHealthCheck> = self.replace_value(LEGACY_CHECKS, &check.table_key(), check)?;
        self.publish(StoreEvent::LegacyCheck);
        Ok(())
    }

    /// List all legacy health checks.
    pub fn list_legacy_checks(&self) -> StateResult<Vec<LegacyHealthCheck>> {
        self.list_values(LEGACY_CHECKS)
    }

    /// Delete a legacy health check by `{namespace}/{name}` key.
    pub fn delete_legacy_check(&self, key: &str) -> StateResult<bool> {
        let removed: Option<LegacyHealthCheck> = self.remove_value(LEGACY_CHECKS, key)?;
        let existed = removed.is_some();
        if existed {
            self.publish(StoreEvent::LegacyCheck);
        }
        Ok(existed)
    }

    // ── Remediations ───────────────────────────────────────────────

    /// Create a remediation handle unless one with the same key exists.
    ///
    /// Returns the stored record and whether it was newly created.
    pub fn create_remediation(
        &self,
        record: &RemediationRecord,
    ) -> StateResult<(RemediationRecord, bool)> {
        let key = record.reference.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing: Option<RemediationRecord> = {
            let mut table = txn.open_table(REMEDIATIONS).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
                None => None,
            };
            if existing.is_none() {
                let bytes = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            existing
        };
        txn.commit().map_err(map_err!(Transaction))?;

        match existing {
            Some(found) => Ok((found, false)),
            None => {
                debug!(%key, node = %record.node, "remediation created");
                Ok((record.clone(), true))
            }
        }
    }

    /// Get a remediation handle by reference.
    pub fn get_remediation(&self, reference: &RemediationRef) -> StateResult<Option<RemediationRecord>> {
        self.get_value(REMEDIATIONS, &reference.table_key())
    }

    /// List all remediation handles.
    pub fn list_remediations(&self) -> StateResult<Vec<RemediationRecord>> {
        self.list_values(REMEDIATIONS)
    }

    /// Delete a remediation handle. Returns true if it existed.
    pub fn delete_remediation(&self, reference: &RemediationRef) -> StateResult<bool> {
        let removed: Option<RemediationRecord> = self.remove_value(REMEDIATIONS, &reference.table_key())?;
        Ok(removed.is_some())
    }

    // ── Cluster flags ──────────────────────────────────────────────

    /// Mark whether a cluster-wide upgrade is in progress.
    pub fn set_cluster_upgrading(&self, upgrading: bool) -> StateResult<()> {
        let _: Option<bool> = self.replace_value(CLUSTER, FLAG_UPGRADING, &upgrading)?;
        debug!(upgrading, "cluster upgrade flag set");
        self.publish(StoreEvent::Cluster);
        Ok(())
    }

    /// Whether a cluster-wide upgrade is in progress.
    pub fn cluster_upgrading(&self) -> StateResult<bool> {
        Ok(self.get_value(CLUSTER, FLAG_UPGRADING)?.unwrap_or(false))
    }
}
