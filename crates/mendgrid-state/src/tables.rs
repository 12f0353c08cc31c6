//! redb table definitions for the MendGrid object store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Nodes keyed by `{node_name}`.
pub const NODES: JsonTable = TableDefinition::new("nodes");

/// Remediation policies keyed by `{policy_name}`.
pub const POLICIES: JsonTable = TableDefinition::new("policies");

/// Legacy health checks keyed by `{namespace}/{name}`.
pub const LEGACY_CHECKS: JsonTable = TableDefinition::new("legacy_checks");

/// Remediation handles keyed by `{kind}/{namespace}/{name}`.
pub const REMEDIATIONS: JsonTable = TableDefinition::new("remediations");

/// Cluster-wide flags keyed by flag name.
pub const CLUSTER: JsonTable = TableDefinition::new("cluster");
