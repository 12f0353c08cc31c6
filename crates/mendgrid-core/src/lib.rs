//! mendgrid-core — shared domain model for the MendGrid remediation controller.
//!
//! Holds the node and policy types persisted by `mendgrid-state`, the label
//! selector language policies use to pick their nodes, duration parsing,
//! daemon configuration, and the admission rules every policy write must
//! pass before it reaches the store.

pub mod config;
pub mod duration;
pub mod selector;
pub mod types;
pub mod validation;

pub use config::MendConfig;
pub use duration::{ceil_secs, parse_duration, parse_secs, DurationError};
pub use selector::{LabelSelector, Operator, Requirement, Selector, SelectorError};
pub use types::*;
pub use validation::{AdmissionError, AdmissionTarget};
