//! mendgrid-controller — the MendGrid reconciliation loop.
//!
//! One reconciliation pass per policy resolves its targets, consults the
//! conflict guard, evaluates node health, applies the quorum gate, walks
//! every unhealthy node up its escalation ladder, and folds the result into
//! the policy status.
//!
//! # Architecture
//!
//! ```text
//! Controller (tokio task)
//!   ├── StoreEvent feed ── policies_for_node_change ──┐
//!   ├── resync interval ──────────────────────────────┤
//!   ├── per-policy wake-ups (deadlines, backoff) ─────┤
//!   │                                                 ▼
//!   │                      one running pass per policy (spawn_blocking)
//!   └── Reconciler
//!         ├── TargetResolver / HealthEvaluator / QuorumGate
//!         ├── ConflictGuard (UpgradeChecker, LegacyCheckDetector)
//!         ├── EscalationEngine ── RemediationClient
//!         └── status::aggregate ── compare-and-swap status write
//! ```
//!
//! Passes for different policies run concurrently. A policy that is
//! triggered while its pass is running is marked dirty and runs again as
//! soon as the current pass finishes.

pub mod controller;
pub mod error;
pub mod external;
pub mod guard;
pub mod reconciler;
pub mod status;

pub use controller::{Controller, ControllerSettings};
pub use error::{ReconcileError, ReconcileResult};
pub use external::{
    LegacyCheckDetector, RemediationClient, StaticUpgradeChecker, StoreLegacyCheckDetector,
    StoreRemediationClient, StoreUpgradeChecker, UpgradeChecker,
};
pub use guard::{Blocker, ConflictGuard};
pub use reconciler::{PassResult, Reconciler, ReconcilerSettings};
