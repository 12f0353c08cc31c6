//! Conflict guard — reasons a policy must not remediate at all right now.
//!
//! Checked on every pass before any escalation work. A tripped guard
//! freezes the policy: no step starts, none is marked timed out, and the
//! existing handles are left alone. The guard clears by itself once the
//! external condition goes away.

use mendgrid_core::{Node, Phase, Policy};
use tracing::debug;

use crate::external::{LegacyCheckDetector, UpgradeChecker};

/// Reason for `Disabled` caused by a configuration error.
pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfiguration";
/// Reason for `Disabled` caused by an overlapping legacy health check.
pub const REASON_CONFLICTING_CHECK: &str = "ConflictingHealthCheck";
pub const REASON_CLUSTER_UPGRADING: &str = "ClusterUpgrading";
pub const REASON_PAUSE_REQUESTED: &str = "PauseRequested";

/// Why a pass was stopped before remediation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocker {
    /// The policy cannot be interpreted (selector, durations, ladder, minimum).
    InvalidConfiguration(String),
    /// A legacy health check already selects one of the policy's nodes.
    LegacyOverlap(String),
    ClusterUpgrading,
    PauseRequested(Vec<String>),
}

impl Blocker {
    /// Whether the policy is reported `Disabled` rather than `Paused`.
    pub fn disables(&self) -> bool {
        matches!(self, Blocker::InvalidConfiguration(_) | Blocker::LegacyOverlap(_))
    }

    pub fn phase(&self) -> Phase {
        if self.disables() {
            Phase::Disabled
        } else {
            Phase::Paused
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Blocker::InvalidConfiguration(_) => REASON_INVALID_CONFIGURATION,
            Blocker::LegacyOverlap(_) => REASON_CONFLICTING_CHECK,
            Blocker::ClusterUpgrading => REASON_CLUSTER_UPGRADING,
            Blocker::PauseRequested(_) => REASON_PAUSE_REQUESTED,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Blocker::InvalidConfiguration(detail) => format!("invalid configuration: {detail}"),
            Blocker::LegacyOverlap(check) => {
                format!("legacy health check {check} selects nodes of this policy")
            }
            Blocker::ClusterUpgrading => "cluster upgrade in progress".to_string(),
            Blocker::PauseRequested(requests) => {
                format!("paused by request: {}", requests.join(", "))
            }
        }
    }
}

/// Consults the external collaborators for one pass.
pub struct ConflictGuard<'a> {
    upgrade: &'a dyn UpgradeChecker,
    legacy: &'a dyn LegacyCheckDetector,
}

impl<'a> ConflictGuard<'a> {
    pub fn new(upgrade: &'a dyn UpgradeChecker, legacy: &'a dyn LegacyCheckDetector) -> Self {
        Self { upgrade, legacy }
    }

    /// First blocker that applies, in precedence order: legacy overlap,
    /// cluster upgrade, pause requests.
    pub fn evaluate(&self, policy: &Policy, targets: &[&Node]) -> anyhow::Result<Option<Blocker>> {
        if let Some(check) = self.legacy.overlapping(targets)? {
            debug!(policy = %policy.name, %check, "legacy health check overlaps");
            return Ok(Some(Blocker::LegacyOverlap(check)));
        }
        if self.upgrade.check()? {
            debug!(policy = %policy.name, "cluster upgrade in progress");
            return Ok(Some(Blocker::ClusterUpgrading));
        }
        if !policy.spec.pause_requests.is_empty() {
            return Ok(Some(Blocker::PauseRequested(policy.spec.pause_requests.clone())));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::StaticUpgradeChecker;
    use mendgrid_core::PolicySpec;

    struct FixedOverlap(Option<&'static str>);

    impl LegacyCheckDetector for FixedOverlap {
        fn overlapping(&self, _nodes: &[&Node]) -> anyhow::Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct Broken;

    impl UpgradeChecker for Broken {
        fn check(&self) -> anyhow::Result<bool> {
            anyhow::bail!("upgrade status unavailable")
        }
    }

    fn policy(pause: &[&str]) -> Policy {
        Policy::new(
            "workers",
            PolicySpec {
                pause_requests: pause.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn clear_when_nothing_applies() {
        let upgrade = StaticUpgradeChecker::new(false);
        let guard = ConflictGuard::new(&upgrade, &FixedOverlap(None));
        assert_eq!(guard.evaluate(&policy(&[]), &[]).unwrap(), None);
    }

    #[test]
    fn overlap_takes_precedence_over_upgrade() {
        let upgrade = StaticUpgradeChecker::new(true);
        let guard = ConflictGuard::new(&upgrade, &FixedOverlap(Some("machine-api/old")));
        let blocker = guard.evaluate(&policy(&["ops"]), &[]).unwrap().unwrap();
        assert_eq!(blocker, Blocker::LegacyOverlap("machine-api/old".to_string()));
        assert_eq!(blocker.phase(), Phase::Disabled);
    }

    #[test]
    fn upgrade_pauses() {
        let upgrade = StaticUpgradeChecker::new(true);
        let guard = ConflictGuard::new(&upgrade, &FixedOverlap(None));
        let blocker = guard.evaluate(&policy(&["ops"]), &[]).unwrap().unwrap();
        assert_eq!(blocker, Blocker::ClusterUpgrading);
        assert_eq!(blocker.phase(), Phase::Paused);
        assert_eq!(blocker.reason(), REASON_CLUSTER_UPGRADING);
    }

    #[test]
    fn pause_requests_pause() {
        let upgrade = StaticUpgradeChecker::new(false);
        let guard = ConflictGuard::new(&upgrade, &FixedOverlap(None));
        let blocker = guard.evaluate(&policy(&["ops", "kernel rollout"]), &[]).unwrap().unwrap();
        assert_eq!(blocker.phase(), Phase::Paused);
        assert_eq!(blocker.message(), "paused by request: ops, kernel rollout");
    }

    #[test]
    fn collaborator_failure_propagates() {
        let guard = ConflictGuard::new(&Broken, &FixedOverlap(None));
        assert!(guard.evaluate(&policy(&[]), &[]).is_err());
    }
}
