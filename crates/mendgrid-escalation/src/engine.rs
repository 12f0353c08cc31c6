//! Escalation engine — drives one unhealthy node up its policy's ladder.
//!
//! The engine only plans: given the node's recorded steps, the ladder, the
//! current time, and whether new remediation may start, it returns the
//! node's next step list and, when a rung must start, the handle to create.
//! The caller performs the create and records the result.
//!
//! ```text
//! NotRemediating ─start─▶ Step[k] Active ─deadline─▶ Step[k] TimedOut
//!                              ▲                          │
//!                              └──────── next rung ───────┘
//! ```
//!
//! A timed-out rung with no successor stays timed out and in flight. When
//! new starts are suppressed, recorded steps are neither advanced nor
//! marked timed out.

use mendgrid_core::{NodeName, RemediationRef, RemediationStep, TemplateRef, UnhealthyNode};
use tracing::debug;

use crate::ladder::{Ladder, LadderStep};

/// Handle naming: one remediation object per node and template kind, named
/// after the node and placed in the template's namespace.
pub fn remediation_ref(template: &TemplateRef, node: &str, fallback_namespace: &str) -> RemediationRef {
    RemediationRef {
        kind: template.remediation_kind().to_string(),
        api_version: template.api_version.clone(),
        name: node.to_string(),
        namespace: template
            .namespace
            .clone()
            .unwrap_or_else(|| fallback_namespace.to_string()),
    }
}

/// A rung that must be started by creating its remediation handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationStart {
    pub template: TemplateRef,
    pub order: i32,
    pub reference: RemediationRef,
}

/// What happened to a node in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do; the current rung is still running or exhausted.
    Held,
    /// Remediation started with the first rung.
    Started { order: i32 },
    /// The current rung timed out and the next one starts.
    Escalated { from: i32, to: i32 },
    /// The last rung timed out; the node stays in flight.
    Exhausted { order: i32 },
    /// Work was due but new starts are not allowed.
    Suppressed,
}

/// The engine's decision for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePlan {
    /// Status entry for the node after this pass.
    pub node: UnhealthyNode,
    pub start: Option<RemediationStart>,
    pub transition: Transition,
    /// When the running rung's deadline is reached.
    pub requeue_at: Option<u64>,
}

pub struct EscalationEngine<'a> {
    ladder: &'a Ladder,
    fallback_namespace: &'a str,
}

impl<'a> EscalationEngine<'a> {
    pub fn new(ladder: &'a Ladder, fallback_namespace: &'a str) -> Self {
        Self {
            ladder,
            fallback_namespace,
        }
    }

    /// Plan the next move for an unhealthy node.
    ///
    /// `current` is the node's entry from the previous status, if any.
    pub fn plan(
        &self,
        node: &NodeName,
        current: Option<&UnhealthyNode>,
        now: u64,
        may_start: bool,
    ) -> NodePlan {
        let mut entry = current.cloned().unwrap_or_else(|| UnhealthyNode {
            name: node.clone(),
            remediations: Vec::new(),
        });

        let Some(last) = entry.remediations.last_mut() else {
            // Not remediating yet.
            let (start, transition, requeue_at) = match (may_start, self.ladder.first()) {
                (true, Some(first)) => {
                    let step = self.begin(node, first, now, &mut entry);
                    (Some(step.0), Transition::Started { order: first.order }, step.1)
                }
                (false, Some(_)) => (None, Transition::Suppressed, None),
                (_, None) => (None, Transition::Held, None),
            };
            return NodePlan {
                node: entry,
                start,
                transition,
                requeue_at,
            };
        };

        let mut newly_timed_out = false;
        if !last.is_timed_out() {
            match last.deadline {
                Some(deadline) if now < deadline => {
                    return NodePlan {
                        node: entry,
                        start: None,
                        transition: Transition::Held,
                        requeue_at: Some(deadline),
                    };
                }
                // No deadline: a non-escalating rung runs until the node recovers.
                None => {
                    return NodePlan {
                        node: entry,
                        start: None,
                        transition: Transition::Held,
                        requeue_at: None,
                    };
                }
                Some(_) if !may_start => {
                    return NodePlan {
                        node: entry,
                        start: None,
                        transition: Transition::Suppressed,
                        requeue_at: None,
                    };
                }
                Some(_) => {
                    last.timed_out = Some(now);
                    newly_timed_out = true;
                    debug!(node = %node, order = last.order, "remediation step timed out");
                }
            }
        }

        let from = last.order;
        match self.ladder.next_after(from) {
            Some(next) if may_start => {
                let step = self.begin(node, next, now, &mut entry);
                NodePlan {
                    node: entry,
                    start: Some(step.0),
                    transition: Transition::Escalated { from, to: next.order },
                    requeue_at: step.1,
                }
            }
            Some(_) => NodePlan {
                node: entry,
                start: None,
                transition: Transition::Suppressed,
                requeue_at: None,
            },
            None => NodePlan {
                node: entry,
                start: None,
                transition: if newly_timed_out {
                    Transition::Exhausted { order: from }
                } else {
                    Transition::Held
                },
                requeue_at: None,
            },
        }
    }

    /// Append a fresh step for `rung` and describe the handle to create.
    fn begin(
        &self,
        node: &str,
        rung: &LadderStep,
        now: u64,
        entry: &mut UnhealthyNode,
    ) -> (RemediationStart, Option<u64>) {
        let reference = remediation_ref(&rung.template, node, self.fallback_namespace);
        let deadline = rung.timeout_secs.map(|t| now.saturating_add(t));
        entry.remediations.push(RemediationStep {
            resource: reference.clone(),
            template_name: rung.template.name.clone(),
            order: rung.order,
            started: now,
            deadline,
            timed_out: None,
        });
        let start = RemediationStart {
            template: rung.template.clone(),
            order: rung.order,
            reference,
        };
        (start, deadline)
    }
}
