//! Health evaluation — classify a node against a policy's unhealthy rules.
//!
//! Rules are checked in declared order and the first one that holds wins.
//! A rule holds once the node reports the rule's condition type with the
//! rule's status, and has done so for at least the rule's duration measured
//! from the condition's last transition. A node that does not report the
//! condition type at all is healthy for that rule.

use mendgrid_core::{parse_secs, ConditionStatus, DurationError, Node, NodeName, UnhealthyCondition};
use tracing::trace;

/// Outcome of evaluating one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Rule `rule` (index into the policy's conditions) has held since `since`.
    Unhealthy {
        rule: usize,
        condition_type: String,
        since: u64,
    },
    /// The node is being deprovisioned and is not a remediation candidate.
    Terminating,
}

/// Per-pass health record for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub node: NodeName,
    pub verdict: Verdict,
    /// Earliest instant a pending rule would start to hold, if any.
    pub recheck_at: Option<u64>,
}

impl HealthRecord {
    pub fn is_healthy(&self) -> bool {
        self.verdict == Verdict::Healthy
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self.verdict, Verdict::Unhealthy { .. })
    }
}

#[derive(Debug, Clone)]
struct Rule {
    condition_type: String,
    status: ConditionStatus,
    duration_secs: u64,
}

/// Compiled unhealthy-condition rules of one policy.
#[derive(Debug, Clone)]
pub struct HealthEvaluator {
    rules: Vec<Rule>,
}

impl HealthEvaluator {
    pub fn new(conditions: &[UnhealthyCondition]) -> Result<Self, DurationError> {
        let rules = conditions
            .iter()
            .map(|c| -> Result<Rule, DurationError> {
                Ok(Rule {
                    condition_type: c.type_.clone(),
                    status: c.status,
                    duration_secs: parse_secs(&c.duration)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Classify `node` at time `now`.
    pub fn evaluate(&self, node: &Node, now: u64) -> HealthRecord {
        if node.is_terminating() {
            return HealthRecord {
                node: node.name.clone(),
                verdict: Verdict::Terminating,
                recheck_at: None,
            };
        }

        let mut recheck_at: Option<u64> = None;
        for (index, rule) in self.rules.iter().enumerate() {
            let Some(condition) = node.condition(&rule.condition_type) else {
                continue;
            };
            if condition.status != rule.status {
                continue;
            }

            let threshold = condition.last_transition_time.saturating_add(rule.duration_secs);
            if now >= threshold {
                trace!(node = %node.name, condition = %rule.condition_type, since = threshold, "rule holds");
                return HealthRecord {
                    node: node.name.clone(),
                    verdict: Verdict::Unhealthy {
                        rule: index,
                        condition_type: rule.condition_type.clone(),
                        since: threshold,
                    },
                    recheck_at: None,
                };
            }
            recheck_at = Some(recheck_at.map_or(threshold, |t| t.min(threshold)));
        }

        HealthRecord {
            node: node.name.clone(),
            verdict: Verdict::Healthy,
            recheck_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mendgrid_core::{NodeCondition, TERMINATING_CONDITION};

    fn rule(type_: &str, status: ConditionStatus, duration: &str) -> UnhealthyCondition {
        UnhealthyCondition {
            type_: type_.to_string(),
            status,
            duration: duration.to_string(),
        }
    }

    fn node(conditions: &[(&str, ConditionStatus, u64)]) -> Node {
        Node {
            name: "worker-0".to_string(),
            labels: Default::default(),
            conditions: conditions
                .iter()
                .map(|(t, s, at)| NodeCondition {
                    type_: t.to_string(),
                    status: *s,
                    last_transition_time: *at,
                })
                .collect(),
        }
    }

    #[test]
    fn duration_threshold_is_inclusive() {
        let evaluator =
            HealthEvaluator::new(&[rule("Ready", ConditionStatus::False, "10s")]).unwrap();
        let n = node(&[("Ready", ConditionStatus::False, 1000)]);

        let early = evaluator.evaluate(&n, 1009);
        assert!(early.is_healthy());
        assert_eq!(early.recheck_at, Some(1010));

        let due = evaluator.evaluate(&n, 1010);
        assert_eq!(
            due.verdict,
            Verdict::Unhealthy {
                rule: 0,
                condition_type: "Ready".to_string(),
                since: 1010,
            }
        );
        assert_eq!(due.recheck_at, None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let evaluator = HealthEvaluator::new(&[
            rule("Ready", ConditionStatus::False, "5m"),
            rule("Ready", ConditionStatus::Unknown, "5m"),
            rule("DiskPressure", ConditionStatus::True, "0s"),
        ])
        .unwrap();
        let n = node(&[
            ("Ready", ConditionStatus::Unknown, 0),
            ("DiskPressure", ConditionStatus::True, 0),
        ]);
        match evaluator.evaluate(&n, 1000).verdict {
            Verdict::Unhealthy { rule, .. } => assert_eq!(rule, 1),
            other => panic!("expected unhealthy, got {other:?}"),
        }
    }

    #[test]
    fn missing_condition_is_healthy() {
        let evaluator =
            HealthEvaluator::new(&[rule("Ready", ConditionStatus::False, "0s")]).unwrap();
        let record = evaluator.evaluate(&node(&[]), 1000);
        assert!(record.is_healthy());
        assert_eq!(record.recheck_at, None);
    }

    #[test]
    fn status_mismatch_is_healthy() {
        let evaluator =
            HealthEvaluator::new(&[rule("Ready", ConditionStatus::False, "0s")]).unwrap();
        let record = evaluator.evaluate(&node(&[("Ready", ConditionStatus::True, 0)]), 1000);
        assert!(record.is_healthy());
    }

    #[test]
    fn recheck_picks_earliest_pending_rule() {
        let evaluator = HealthEvaluator::new(&[
            rule("Ready", ConditionStatus::False, "5m"),
            rule("MemoryPressure", ConditionStatus::True, "30s"),
        ])
        .unwrap();
        let n = node(&[
            ("Ready", ConditionStatus::False, 1000),
            ("MemoryPressure", ConditionStatus::True, 1000),
        ]);
        assert_eq!(evaluator.evaluate(&n, 1010).recheck_at, Some(1030));
    }

    #[test]
    fn terminating_node_is_not_a_candidate() {
        let evaluator =
            HealthEvaluator::new(&[rule("Ready", ConditionStatus::False, "0s")]).unwrap();
        let n = node(&[
            ("Ready", ConditionStatus::False, 0),
            (TERMINATING_CONDITION, ConditionStatus::True, 0),
        ]);
        let record = evaluator.evaluate(&n, 1000);
        assert_eq!(record.verdict, Verdict::Terminating);
        assert!(!record.is_healthy());
        assert!(!record.is_unhealthy());
    }

    #[test]
    fn malformed_duration_is_rejected() {
        assert!(HealthEvaluator::new(&[rule("Ready", ConditionStatus::False, "soon")]).is_err());
    }
}
