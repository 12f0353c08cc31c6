//! Change notifications published by the store.

use mendgrid_core::{Node, PolicyName};

/// A mutation observed on the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A node was created, updated, or deleted. Both sides are carried so
    /// label changes can be mapped to policies that gained or lost the node.
    Node {
        old: Option<Box<Node>>,
        new: Option<Box<Node>>,
    },
    /// A policy spec was created, updated, or deleted.
    Policy { name: PolicyName },
    /// Only the status of a policy was rewritten by the reconciler.
    PolicyStatus { name: PolicyName },
    /// A legacy health check was created, updated, or deleted.
    LegacyCheck,
    /// A cluster-wide flag changed.
    Cluster,
}
