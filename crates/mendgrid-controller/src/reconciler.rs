//! Reconciler: one pass over one policy.
//!
//! A pass reads the policy and the node set, decides what to remediate,
//! creates any remediation handles that must start, and writes the new
//! status with compare-and-swap. On a write conflict the whole pass is
//! recomputed from a fresh read. Handle creation is idempotent, so a
//! recomputed pass never starts the same step twice. A handle that already
//! exists but belongs to another policy or rung fails the pass.

use std::sync::Arc;

use mendgrid_core::{MinHealthy, Node, Policy, PolicySpec, PolicyStatus};
use mendgrid_escalation::{EscalationEngine, Ladder, Transition};
use mendgrid_health::{HealthEvaluator, QuorumGate, SharedClock, TargetResolver};
use mendgrid_state::{RemediationRecord, StateStore};
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::external::{LegacyCheckDetector, RemediationClient, UpgradeChecker};
use crate::guard::{Blocker, ConflictGuard};
use crate::status::{aggregate, PassSummary};

/// Tunables of a pass.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Attempts at writing status before giving up on conflicts.
    pub status_retries: u32,
    /// Namespace for handles whose template names none.
    pub remediation_namespace: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            status_retries: 3,
            remediation_namespace: "mendgrid".to_string(),
        }
    }
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassResult {
    pub status: PolicyStatus,
    /// False when the computed status equalled the stored one.
    pub status_written: bool,
    /// Earliest instant (epoch seconds) the policy must be looked at again.
    pub requeue_at: Option<u64>,
}

struct Computed {
    status: PolicyStatus,
    requeue_at: Option<u64>,
}

pub struct Reconciler {
    store: StateStore,
    clock: SharedClock,
    upgrade: Arc<dyn UpgradeChecker>,
    legacy: Arc<dyn LegacyCheckDetector>,
    remediations: Arc<dyn RemediationClient>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        clock: SharedClock,
        upgrade: Arc<dyn UpgradeChecker>,
        legacy: Arc<dyn LegacyCheckDetector>,
        remediations: Arc<dyn RemediationClient>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            clock,
            upgrade,
            legacy,
            remediations,
            settings,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Run one pass for `name`. Returns `None` if the policy no longer exists.
    pub fn reconcile(&self, name: &str) -> ReconcileResult<Option<PassResult>> {
        let attempts = self.settings.status_retries.max(1);
        for attempt in 1..=attempts {
            let Some(policy) = self.store.get_policy(name)? else {
                debug!(policy = %name, "policy gone, nothing to reconcile");
                return Ok(None);
            };
            let nodes = self.store.list_nodes()?;
            let now = self.clock.now();

            let computed = self.compute(&policy, &nodes, now)?;
            if computed.status == policy.status {
                debug!(policy = %name, "status unchanged");
                return Ok(Some(PassResult {
                    status: computed.status,
                    status_written: false,
                    requeue_at: computed.requeue_at,
                }));
            }

            match self
                .store
                .update_policy_status(name, policy.resource_version, &computed.status)
            {
                Ok(_) => {
                    if computed.status.phase != policy.status.phase {
                        info!(
                            policy = %name,
                            from = policy.status.phase.as_str(),
                            to = computed.status.phase.as_str(),
                            "policy phase changed"
                        );
                    }
                    return Ok(Some(PassResult {
                        status: computed.status,
                        status_written: true,
                        requeue_at: computed.requeue_at,
                    }));
                }
                Err(e) if e.is_conflict() => {
                    debug!(policy = %name, attempt, "status write conflicted, recomputing");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcileError::Conflict {
            policy: name.to_string(),
            attempts,
        })
    }

    fn compute(&self, policy: &Policy, nodes: &[Node], now: u64) -> ReconcileResult<Computed> {
        let spec = &policy.spec;
        let previous = &policy.status;

        let Compiled {
            resolver,
            evaluator,
            ladder,
            min_healthy,
        } = match compile(spec) {
            Ok(compiled) => compiled,
            Err(detail) => {
                warn!(policy = %policy.name, %detail, "policy disabled by configuration error");
                return Ok(blocked(previous, Blocker::InvalidConfiguration(detail), None, now));
            }
        };

        let targets = resolver.resolve(nodes);

        let guard = ConflictGuard::new(self.upgrade.as_ref(), self.legacy.as_ref());
        if let Some(blocker) = guard.evaluate(policy, &targets)? {
            warn!(policy = %policy.name, reason = blocker.reason(), "remediation frozen");
            return Ok(blocked(previous, blocker, Some(targets.as_slice()), now));
        }

        let records: Vec<_> = targets.iter().map(|n| evaluator.evaluate(n, now)).collect();
        let healthy = records.iter().filter(|r| r.is_healthy()).count() as u32;
        let gate = match QuorumGate::evaluate(&min_healthy, targets.len() as u32, healthy) {
            Ok(gate) => gate,
            Err(e) => {
                let blocker = Blocker::InvalidConfiguration(format!("min healthy: {e}"));
                return Ok(blocked(previous, blocker, Some(targets.as_slice()), now));
            }
        };
        if !gate.is_open() {
            warn!(policy = %policy.name, %gate, "quorum gate closed, new remediation suspended");
        }

        let mut requeue_at = records.iter().filter_map(|r| r.recheck_at).min();
        let engine = EscalationEngine::new(&ladder, &self.settings.remediation_namespace);
        let mut unhealthy_nodes = Vec::new();

        for record in records.iter().filter(|r| r.is_unhealthy()) {
            let plan = engine.plan(
                &record.node,
                previous.unhealthy_node(&record.node),
                now,
                gate.is_open(),
            );

            if let Some(start) = &plan.start {
                let wanted = RemediationRecord {
                    reference: start.reference.clone(),
                    node: record.node.clone(),
                    policy: policy.name.clone(),
                    template: start.template.clone(),
                    order: start.order,
                    created_at: now,
                };
                let created = self.remediations.create(&wanted)?;
                if !created {
                    self.adopt_existing(&wanted)?;
                }
                debug!(policy = %policy.name, node = %record.node, created, "remediation handle ensured");
            }

            match plan.transition {
                Transition::Started { order } => {
                    info!(policy = %policy.name, node = %record.node, order, "remediation started");
                }
                Transition::Escalated { from, to } => {
                    info!(policy = %policy.name, node = %record.node, from, to, "remediation step timed out, escalating");
                }
                Transition::Exhausted { order } => {
                    info!(policy = %policy.name, node = %record.node, order, "last remediation step timed out");
                }
                Transition::Suppressed => {
                    debug!(policy = %policy.name, node = %record.node, "remediation suppressed");
                }
                Transition::Held => {}
            }

            if let Some(at) = plan.requeue_at {
                requeue_at = Some(requeue_at.map_or(at, |t| t.min(at)));
            }
            unhealthy_nodes.push(plan.node);
        }

        for gone in previous
            .unhealthy_nodes
            .iter()
            .filter(|n| n.is_in_flight() && !unhealthy_nodes.iter().any(|u| u.name == n.name))
        {
            info!(policy = %policy.name, node = %gone.name, "node healthy again, remediation cleared");
        }

        let summary = PassSummary {
            blocker: None,
            gate: Some(gate),
            observed_nodes: targets.len() as u32,
            healthy_nodes: healthy,
            unhealthy_nodes,
        };
        Ok(Computed {
            status: aggregate(previous, summary, now),
            requeue_at,
        })
    }
}

/// The parsed, ready-to-run form of a policy spec.
struct Compiled {
    resolver: TargetResolver,
    evaluator: HealthEvaluator,
    ladder: Ladder,
    min_healthy: MinHealthy,
}

impl Reconciler {
    /// Accept a handle that already existed only if it is the one this step
    /// would have created: same node, policy and rung.
    fn adopt_existing(&self, wanted: &RemediationRecord) -> ReconcileResult<()> {
        let Some(existing) = self.remediations.get(&wanted.reference)? else {
            return Err(anyhow::anyhow!("remediation {} vanished right after create", wanted.reference.table_key()).into());
        };
        if existing.node == wanted.node && existing.policy == wanted.policy && existing.order == wanted.order {
            return Ok(());
        }
        warn!(
            policy = %wanted.policy,
            node = %wanted.node,
            reference = %wanted.reference.table_key(),
            owner = %existing.policy,
            order = existing.order,
            "remediation handle held by another step"
        );
        Err(ReconcileError::HandleTaken {
            reference: wanted.reference.table_key(),
            policy: existing.policy,
            order: existing.order,
        })
    }
}

fn compile(spec: &PolicySpec) -> Result<Compiled, String> {
    let resolver = TargetResolver::new(&spec.selector).map_err(|e| format!("selector: {e}"))?;
    let evaluator = HealthEvaluator::new(&spec.unhealthy_conditions)
        .map_err(|e| format!("unhealthy conditions: {e}"))?;
    let ladder = Ladder::from_spec(spec).map_err(|e| format!("remediation: {e}"))?;
    let min_healthy = spec.min_healthy_or_default();
    min_healthy.validate().map_err(|e| format!("min healthy: {e}"))?;
    Ok(Compiled {
        resolver,
        evaluator,
        ladder,
        min_healthy,
    })
}

/// Status for a pass stopped before escalation: recorded steps are kept as
/// they are, minus nodes that left the target set.
fn blocked(previous: &PolicyStatus, blocker: Blocker, targets: Option<&[&Node]>, now: u64) -> Computed {
    let unhealthy_nodes = previous
        .unhealthy_nodes
        .iter()
        .filter(|n| targets.is_none_or(|t| t.iter().any(|node| node.name == n.name)))
        .cloned()
        .collect();
    let summary = PassSummary {
        blocker: Some(blocker),
        gate: None,
        observed_nodes: targets.map_or(previous.observed_nodes, |t| t.len() as u32),
        healthy_nodes: previous.healthy_nodes,
        unhealthy_nodes,
    };
    Computed {
        status: aggregate(previous, summary, now),
        requeue_at: None,
    }
}
