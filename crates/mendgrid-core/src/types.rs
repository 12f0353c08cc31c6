//! Domain types for nodes, remediation policies, and policy status.
//!
//! Nodes are owned by the cluster substrate and only read here. Policies are
//! written by operators through the admission rules in `validation`; their
//! `status` is written exclusively by the reconciler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selector::LabelSelector;

/// Unique name of a node in the cluster.
pub type NodeName = String;

/// Unique name of a remediation policy.
pub type PolicyName = String;

/// Role label carried by control-plane nodes.
pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Legacy role label carried by control-plane nodes.
pub const MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

/// Condition reported on nodes that are being deprovisioned.
pub const TERMINATING_CONDITION: &str = "Terminating";

/// Minimum-healthy value applied when a policy leaves it unset.
pub const DEFAULT_MIN_HEALTHY: &str = "51%";

/// Suffix stripped from a template kind to derive the remediation kind.
const TEMPLATE_SUFFIX: &str = "Template";

// ── Node ──────────────────────────────────────────────────────────

/// Tri-state status shared by node conditions and policy conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A condition reported by the node's agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// Unix timestamp (seconds) of the last status change.
    pub last_transition_time: u64,
}

/// A machine participating in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

impl Node {
    /// Look up the reported condition of the given type.
    pub fn condition(&self, type_: &str) -> Option<&NodeCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Whether the substrate reports the node as being deprovisioned.
    pub fn is_terminating(&self) -> bool {
        self.condition(TERMINATING_CONDITION)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether the node carries a control-plane role label.
    pub fn is_control_plane(&self) -> bool {
        self.labels.contains_key(CONTROL_PLANE_ROLE_LABEL)
            || self.labels.contains_key(MASTER_ROLE_LABEL)
    }
}

// ── Policy spec ───────────────────────────────────────────────────

/// A node is unhealthy once `type_` has reported `status` for `duration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhealthyCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// Minimum time the condition must hold (e.g., "5m").
    pub duration: String,
}

/// Reference to a remediation template object owned by an executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateRef {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TemplateRef {
    /// Kind of the remediation objects stamped out from this template.
    pub fn remediation_kind(&self) -> &str {
        self.kind
            .strip_suffix(TEMPLATE_SUFFIX)
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.kind)
    }
}

/// One rung of an escalation ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalatingRemediation {
    pub template: TemplateRef,
    /// Lower orders run first.
    pub order: i32,
    /// How long this step may run before escalating (e.g., "5m").
    pub timeout: String,
}

/// Minimum number of healthy nodes, absolute or as a percentage of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinHealthy {
    Count(i64),
    Percent(String),
}

/// Rounding applied when a percentage does not divide the target count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Up,
    Down,
}

/// Percentages always round up so that "51%" of 3 nodes means 2 nodes.
pub const PERCENT_ROUNDING: Rounding = Rounding::Up;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MinHealthyError {
    #[error("negative value {0}")]
    Negative(i64),
    #[error("malformed percentage {0:?}, expected a value like \"40%\"")]
    MalformedPercent(String),
    #[error("percentage {0}% is above 100%")]
    PercentOutOfRange(u64),
}

impl MinHealthy {
    /// Parse a CLI/config style value: `"3"` or `"40%"`.
    pub fn parse(s: &str) -> Result<Self, MinHealthyError> {
        let s = s.trim();
        if s.ends_with('%') {
            let value = Self::Percent(s.to_string());
            value.validate()?;
            return Ok(value);
        }
        let count = s
            .parse::<i64>()
            .map_err(|_| MinHealthyError::MalformedPercent(s.to_string()))?;
        let value = Self::Count(count);
        value.validate()?;
        Ok(value)
    }

    /// Syntactic validation only.
    pub fn validate(&self) -> Result<(), MinHealthyError> {
        match self {
            Self::Count(n) if *n < 0 => Err(MinHealthyError::Negative(*n)),
            Self::Count(_) => Ok(()),
            Self::Percent(s) => parse_percent(s).map(|_| ()),
        }
    }

    /// Resolve into an absolute node count for a target set of `total` nodes.
    pub fn resolve(&self, total: u32) -> Result<u32, MinHealthyError> {
        match self {
            Self::Count(n) if *n < 0 => Err(MinHealthyError::Negative(*n)),
            Self::Count(n) => Ok(u32::try_from(*n).unwrap_or(u32::MAX)),
            Self::Percent(s) => {
                let percent = parse_percent(s)?;
                let scaled = u64::from(total) * percent;
                let count = match PERCENT_ROUNDING {
                    Rounding::Up => scaled.div_ceil(100),
                    Rounding::Down => scaled / 100,
                };
                Ok(count as u32)
            }
        }
    }
}

impl Default for MinHealthy {
    fn default() -> Self {
        Self::Percent(DEFAULT_MIN_HEALTHY.to_string())
    }
}

fn parse_percent(s: &str) -> Result<u64, MinHealthyError> {
    let digits = s
        .strip_suffix('%')
        .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| MinHealthyError::MalformedPercent(s.to_string()))?;
    let percent = digits
        .parse::<u64>()
        .map_err(|_| MinHealthyError::MalformedPercent(s.to_string()))?;
    if percent > 100 {
        return Err(MinHealthyError::PercentOutOfRange(percent));
    }
    Ok(percent)
}

/// Desired behaviour of a remediation policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub selector: LabelSelector,
    #[serde(default)]
    pub unhealthy_conditions: Vec<UnhealthyCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_healthy: Option<MinHealthy>,
    /// Single, non-escalating remediation. Exclusive with `escalating_remediations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_template: Option<TemplateRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalating_remediations: Vec<EscalatingRemediation>,
    /// Any entry pauses new remediation; entries name who asked and why.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pause_requests: Vec<String>,
}

impl PolicySpec {
    /// Effective minimum-healthy value (default when unset).
    pub fn min_healthy_or_default(&self) -> MinHealthy {
        self.min_healthy.clone().unwrap_or_default()
    }
}

// ── Policy status ─────────────────────────────────────────────────

/// Top-level state of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Enabled,
    Disabled,
    Paused,
    Remediating,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Enabled => "Enabled",
            Phase::Disabled => "Disabled",
            Phase::Paused => "Paused",
            Phase::Remediating => "Remediating",
        }
    }
}

/// Type of the condition reporting whether a policy is disabled.
pub const CONDITION_DISABLED: &str = "Disabled";

/// Structured status condition on a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Unix timestamp (seconds) of the last status flip.
    pub last_transition_time: u64,
}

/// Opaque handle of a remediation object created for a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemediationRef {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    pub namespace: String,
}

impl RemediationRef {
    /// Composite store key: `{kind}/{namespace}/{name}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Progress of one escalation step for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationStep {
    pub resource: RemediationRef,
    pub template_name: String,
    pub order: i32,
    /// Unix timestamp when the step was started.
    pub started: u64,
    /// Unix timestamp after which the step counts as timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    /// Unix timestamp when the timeout was observed. Never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<u64>,
}

impl RemediationStep {
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.is_some()
    }
}

/// An unhealthy node and the remediation steps started for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhealthyNode {
    pub name: NodeName,
    #[serde(default)]
    pub remediations: Vec<RemediationStep>,
}

impl UnhealthyNode {
    pub fn is_in_flight(&self) -> bool {
        !self.remediations.is_empty()
    }

    /// The most recently started step.
    pub fn current_step(&self) -> Option<&RemediationStep> {
        self.remediations.last()
    }
}

/// Externally visible status of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Size of the resolved target set.
    #[serde(default)]
    pub observed_nodes: u32,
    #[serde(default)]
    pub healthy_nodes: u32,
    #[serde(default)]
    pub unhealthy_nodes: Vec<UnhealthyNode>,
    #[serde(default)]
    pub in_flight_remediations: u32,
}

impl PolicyStatus {
    /// Whether any node has a remediation in progress.
    pub fn has_in_flight(&self) -> bool {
        self.in_flight_remediations > 0 || self.unhealthy_nodes.iter().any(UnhealthyNode::is_in_flight)
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn unhealthy_node(&self, name: &str) -> Option<&UnhealthyNode> {
        self.unhealthy_nodes.iter().find(|n| n.name == name)
    }
}

// ── Policy object ─────────────────────────────────────────────────

/// A stored remediation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: PolicyName,
    pub spec: PolicySpec,
    #[serde(default)]
    pub status: PolicyStatus,
    /// Bumped by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
}

impl Policy {
    pub fn new(name: &str, spec: PolicySpec) -> Self {
        Self {
            name: name.to_string(),
            spec,
            status: PolicyStatus::default(),
            resource_version: 0,
        }
    }
}

/// An older-generation health check owned by a different controller.
///
/// Only its selector matters here: it is used to detect overlap with
/// policies so two mechanisms never remediate the same node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyHealthCheck {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub selector: LabelSelector,
    #[serde(default)]
    pub unhealthy_conditions: Vec<UnhealthyCondition>,
}

impl LegacyHealthCheck {
    /// Composite store key: `{namespace}/{name}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(conditions: Vec<NodeCondition>, labels: &[(&str, &str)]) -> Node {
        Node {
            name: "worker-0".into(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            conditions,
        }
    }

    #[test]
    fn percent_rounds_up() {
        let min = MinHealthy::Percent("51%".into());
        assert_eq!(min.resolve(3), Ok(2));
        assert_eq!(min.resolve(4), Ok(3));
        assert_eq!(min.resolve(0), Ok(0));
        assert_eq!(MinHealthy::Percent("10%".into()).resolve(4), Ok(1));
        assert_eq!(MinHealthy::Percent("100%".into()).resolve(7), Ok(7));
    }

    #[test]
    fn absolute_count_passes_through() {
        assert_eq!(MinHealthy::Count(3).resolve(4), Ok(3));
        assert_eq!(MinHealthy::Count(10).resolve(4), Ok(10));
        assert_eq!(MinHealthy::Count(-1).resolve(4), Err(MinHealthyError::Negative(-1)));
    }

    #[test]
    fn malformed_percentages_are_rejected() {
        for bad in ["%", "ten%", "10", "-5%", "10 %", "1.5%"] {
            let value = MinHealthy::Percent(bad.into());
            assert!(value.validate().is_err(), "{bad} should be rejected");
        }
        assert_eq!(
            MinHealthy::Percent("150%".into()).validate(),
            Err(MinHealthyError::PercentOutOfRange(150))
        );
    }

    #[test]
    fn min_healthy_parses_cli_values() {
        assert_eq!(MinHealthy::parse("3"), Ok(MinHealthy::Count(3)));
        assert_eq!(MinHealthy::parse("40%"), Ok(MinHealthy::Percent("40%".into())));
        assert!(MinHealthy::parse("-2").is_err());
        assert!(MinHealthy::parse("lots").is_err());
    }

    #[test]
    fn min_healthy_deserializes_int_or_string() {
        let count: MinHealthy = serde_json::from_str("2").unwrap();
        assert_eq!(count, MinHealthy::Count(2));
        let percent: MinHealthy = serde_json::from_str("\"25%\"").unwrap();
        assert_eq!(percent, MinHealthy::Percent("25%".into()));
    }

    #[test]
    fn default_min_healthy_is_51_percent() {
        let spec = PolicySpec::default();
        assert_eq!(spec.min_healthy_or_default(), MinHealthy::Percent("51%".into()));
    }

    #[test]
    fn remediation_kind_strips_template_suffix() {
        let template = TemplateRef {
            kind: "SelfNodeRemediationTemplate".into(),
            api_version: "remediation.mendgrid.io/v1alpha1".into(),
            name: "reboot".into(),
            namespace: None,
        };
        assert_eq!(template.remediation_kind(), "SelfNodeRemediation");

        let bare = TemplateRef {
            kind: "Template".into(),
            ..template
        };
        assert_eq!(bare.remediation_kind(), "Template");
    }

    #[test]
    fn terminating_and_control_plane_detection() {
        let node = node_with(
            vec![NodeCondition {
                type_: TERMINATING_CONDITION.into(),
                status: ConditionStatus::True,
                last_transition_time: 0,
            }],
            &[(MASTER_ROLE_LABEL, "")],
        );
        assert!(node.is_terminating());
        assert!(node.is_control_plane());

        let plain = node_with(Vec::new(), &[("zone", "a")]);
        assert!(!plain.is_terminating());
        assert!(!plain.is_control_plane());
    }

    #[test]
    fn status_in_flight_tracks_remediations() {
        let mut status = PolicyStatus::default();
        assert!(!status.has_in_flight());

        status.unhealthy_nodes.push(UnhealthyNode {
            name: "worker-0".into(),
            remediations: Vec::new(),
        });
        assert!(!status.has_in_flight());

        status.unhealthy_nodes[0].remediations.push(RemediationStep {
            resource: RemediationRef {
                kind: "Reboot".into(),
                api_version: "v1".into(),
                name: "worker-0".into(),
                namespace: "default".into(),
            },
            template_name: "reboot".into(),
            order: 0,
            started: 100,
            deadline: None,
            timed_out: None,
        });
        assert!(status.has_in_flight());
    }

    #[test]
    fn policy_serializes_roundtrip() {
        let policy = Policy::new(
            "workers",
            PolicySpec {
                selector: LabelSelector::exists("node-role.kubernetes.io/worker"),
                min_healthy: Some(MinHealthy::Count(1)),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&policy).unwrap();
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
