//! Errors of a reconciliation pass.
//!
//! Configuration problems are not errors here: they are reported on the
//! policy status. What remains is either transient (retry after backoff), a
//! status write that kept losing the optimistic-concurrency race, or a
//! remediation handle owned by a different step.

use mendgrid_state::StateError;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StateError),

    #[error("external call failed: {0:#}")]
    Transient(#[from] anyhow::Error),

    #[error("status of policy {policy} still conflicting after {attempts} attempts")]
    Conflict { policy: String, attempts: u32 },

    /// A step's handle already exists for another policy or rung.
    #[error("remediation {reference} is already held by policy {policy} at order {order}")]
    HandleTaken {
        reference: String,
        policy: String,
        order: i32,
    },
}

impl ReconcileError {
    /// Whether retrying the same pass later may succeed without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Store(_) | ReconcileError::Transient(_))
    }
}
