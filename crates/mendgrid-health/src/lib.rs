//! mendgrid-health — node health evaluation for MendGrid policies.
//!
//! Everything here is pure: given a policy, the node set, and the current
//! time, decide which nodes a policy targets, which of those are unhealthy,
//! and whether enough of them are healthy to allow remediation at all.
//!
//! # Architecture
//!
//! ```text
//! Reconcile pass
//!   ├── TargetResolver   (selector + control-plane exclusion → target set)
//!   ├── HealthEvaluator  (unhealthy-condition rules × Clock → HealthRecord)
//!   └── QuorumGate       (targets, healthy, MinHealthy → open / closed)
//! ```
//!
//! # Time
//!
//! All timestamps are Unix epoch seconds. The current time comes from a
//! `Clock`, so tests drive condition durations with `ManualClock` instead
//! of sleeping.

pub mod clock;
pub mod evaluator;
pub mod quorum;
pub mod target;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use evaluator::{HealthEvaluator, HealthRecord, Verdict};
pub use quorum::QuorumGate;
pub use target::{policies_for_node_change, TargetResolver};
