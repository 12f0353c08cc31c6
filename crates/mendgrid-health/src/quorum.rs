//! Healthy-quorum gate — the circuit breaker in front of remediation.
//!
//! With `T` target nodes of which `H` are healthy and a policy minimum `M`,
//! new remediation may only start while `H >= M`. An empty target set is
//! always open.

use std::fmt;

use mendgrid_core::{MinHealthy, MinHealthyError};

/// Result of evaluating the gate for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumGate {
    pub targets: u32,
    pub healthy: u32,
    pub min_healthy: u32,
}

impl QuorumGate {
    pub fn evaluate(min: &MinHealthy, targets: u32, healthy: u32) -> Result<Self, MinHealthyError> {
        Ok(Self {
            targets,
            healthy,
            min_healthy: min.resolve(targets)?,
        })
    }

    /// Whether new remediation may start.
    pub fn is_open(&self) -> bool {
        self.targets == 0 || self.healthy >= self.min_healthy
    }
}

impl fmt::Display for QuorumGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} target nodes healthy, {} required",
            self.healthy, self.targets, self.min_healthy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_target_set_is_open() {
        let gate = QuorumGate::evaluate(&MinHealthy::Count(3), 0, 0).unwrap();
        assert!(gate.is_open());
    }

    #[test]
    fn count_boundary() {
        let min = MinHealthy::Count(3);
        assert!(QuorumGate::evaluate(&min, 4, 3).unwrap().is_open());
        assert!(!QuorumGate::evaluate(&min, 4, 2).unwrap().is_open());
        assert!(!QuorumGate::evaluate(&min, 4, 1).unwrap().is_open());
    }

    #[test]
    fn percentage_rounds_up() {
        // 51% of 3 is 1.53, so 2 healthy nodes are required.
        let min = MinHealthy::Percent("51%".to_string());
        let gate = QuorumGate::evaluate(&min, 3, 1).unwrap();
        assert_eq!(gate.min_healthy, 2);
        assert!(!gate.is_open());
        assert!(QuorumGate::evaluate(&min, 3, 2).unwrap().is_open());
    }

    #[test]
    fn count_above_targets_keeps_gate_closed() {
        let gate = QuorumGate::evaluate(&MinHealthy::Count(10), 4, 4).unwrap();
        assert!(!gate.is_open());
        assert_eq!(gate.to_string(), "4 of 4 target nodes healthy, 10 required");
    }

    #[test]
    fn malformed_minimum_is_an_error() {
        assert!(QuorumGate::evaluate(&MinHealthy::Count(-1), 4, 4).is_err());
        assert!(QuorumGate::evaluate(&MinHealthy::Percent("x%".to_string()), 4, 4).is_err());
    }
}
