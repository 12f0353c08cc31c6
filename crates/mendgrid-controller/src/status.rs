//! Status aggregation — fold one pass into the externally visible status.
//!
//! Phase is derived only from the conflict guard and from whether any node
//! has a remediation in flight:
//!
//! | Guard | In flight | Phase |
//! |---|---|---|
//! | invalid config / legacy overlap | any | `Disabled` |
//! | upgrade / pause request | any | `Paused` |
//! | clear | yes | `Remediating` |
//! | clear | no | `Enabled` |
//!
//! The `Disabled` condition keeps its transition time until its status
//! actually flips, so an unchanged pass produces an identical status.

use mendgrid_core::{Condition, ConditionStatus, Phase, PolicyStatus, UnhealthyNode, CONDITION_DISABLED};
use mendgrid_health::QuorumGate;

use crate::guard::Blocker;

/// Reason on the `Disabled` condition while the policy is active.
pub const REASON_AS_EXPECTED: &str = "AsExpected";

/// Everything a pass learned that ends up in the status.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub blocker: Option<Blocker>,
    pub gate: Option<QuorumGate>,
    pub observed_nodes: u32,
    pub healthy_nodes: u32,
    pub unhealthy_nodes: Vec<UnhealthyNode>,
}

pub fn phase_for(blocker: Option<&Blocker>, in_flight: bool) -> Phase {
    match blocker {
        Some(blocker) => blocker.phase(),
        None if in_flight => Phase::Remediating,
        None => Phase::Enabled,
    }
}

/// Build the status for this pass on top of the previous one.
pub fn aggregate(previous: &PolicyStatus, summary: PassSummary, now: u64) -> PolicyStatus {
    let in_flight = summary
        .unhealthy_nodes
        .iter()
        .filter(|n| n.is_in_flight())
        .count() as u32;
    let blocker = summary.blocker.as_ref();

    let reason = match (blocker, summary.gate) {
        (Some(blocker), _) => Some(blocker.message()),
        (None, Some(gate)) if !gate.is_open() => Some(format!("remediation suspended: {gate}")),
        (None, _) if in_flight > 0 => Some(format!("{in_flight} node(s) under remediation")),
        (None, _) => None,
    };

    PolicyStatus {
        phase: phase_for(blocker, in_flight > 0),
        reason,
        conditions: vec![disabled_condition(previous, blocker, now)],
        observed_nodes: summary.observed_nodes,
        healthy_nodes: summary.healthy_nodes,
        unhealthy_nodes: summary.unhealthy_nodes,
        in_flight_remediations: in_flight,
    }
}

fn disabled_condition(previous: &PolicyStatus, blocker: Option<&Blocker>, now: u64) -> Condition {
    let (status, reason, message) = match blocker {
        Some(blocker) if blocker.disables() => {
            (ConditionStatus::True, blocker.reason(), blocker.message())
        }
        _ => (ConditionStatus::False, REASON_AS_EXPECTED, String::new()),
    };
    let last_transition_time = previous
        .condition(CONDITION_DISABLED)
        .filter(|c| c.status == status)
        .map_or(now, |c| c.last_transition_time);

    Condition {
        type_: CONDITION_DISABLED.to_string(),
        status,
        reason: reason.to_string(),
        message,
        last_transition_time,
    }
}
