//! mendgrid-escalation — remediation ladders for unhealthy nodes.
//!
//! A policy remediates a node by walking an ordered ladder of remediation
//! templates. Each rung gets a timeout; when it expires with the node still
//! unhealthy the rung is marked timed out and the next one starts. A policy
//! with a single non-escalating template is a one-rung ladder without a
//! timeout.
//!
//! # Components
//!
//! - **`ladder`**: Ladder built from a policy spec (ordering, timeouts, next rung)
//! - **`engine`**: Per-node state machine (start, time out, escalate, hold)

pub mod engine;
pub mod ladder;

pub use engine::{remediation_ref, EscalationEngine, NodePlan, RemediationStart, Transition};
pub use ladder::{Ladder, LadderError, LadderStep};
