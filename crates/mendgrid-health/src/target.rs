//! Target resolution — which nodes a policy is responsible for.
//!
//! Control-plane nodes are filtered out before selector matching unless the
//! selector itself names a control-plane role label, which is the only way
//! a policy can opt those nodes back in.

use std::collections::BTreeSet;

use mendgrid_core::{
    LabelSelector, Node, Policy, PolicyName, Selector, SelectorError, CONTROL_PLANE_ROLE_LABEL,
    MASTER_ROLE_LABEL,
};
use tracing::debug;

/// A compiled policy selector plus the implicit role exclusion.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    selector: Selector,
    exclude_control_plane: bool,
}

impl TargetResolver {
    pub fn new(selector: &LabelSelector) -> Result<Self, SelectorError> {
        let exclude_control_plane = !(selector.references_key(CONTROL_PLANE_ROLE_LABEL)
            || selector.references_key(MASTER_ROLE_LABEL));
        Ok(Self {
            selector: selector.compile()?,
            exclude_control_plane,
        })
    }

    /// Whether `node` belongs to the target set.
    pub fn targets(&self, node: &Node) -> bool {
        if self.exclude_control_plane && node.is_control_plane() {
            return false;
        }
        self.selector.matches(&node.labels)
    }

    /// Filter `nodes` down to the target set, preserving order.
    pub fn resolve<'a>(&self, nodes: &'a [Node]) -> Vec<&'a Node> {
        nodes.iter().filter(|n| self.targets(n)).collect()
    }
}

/// Policies that must be re-evaluated after a node changed.
///
/// A policy is affected when either the old or the new version of the node
/// is in its target set, so a label change that moves a node out of a
/// policy still wakes that policy up. Policies with malformed selectors are
/// skipped; periodic resync surfaces their configuration error.
pub fn policies_for_node_change(
    policies: &[Policy],
    old: Option<&Node>,
    new: Option<&Node>,
) -> BTreeSet<PolicyName> {
    let mut affected = BTreeSet::new();
    for policy in policies {
        let Ok(resolver) = TargetResolver::new(&policy.spec.selector) else {
            debug!(policy = %policy.name, "skipping policy with malformed selector");
            continue;
        };
        if old.is_some_and(|n| resolver.targets(n)) || new.is_some_and(|n| resolver.targets(n)) {
            affected.insert(policy.name.clone());
        }
    }
    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use mendgrid_core::{Operator, PolicySpec, Requirement};

    fn node(name: &str, labels: &[(&str, &str)]) -> Node {
        Node {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            conditions: Vec::new(),
        }
    }

    fn policy(name: &str, selector: LabelSelector) -> Policy {
        Policy::new(
            name,
            PolicySpec {
                selector,
                ..Default::default()
            },
        )
    }

    #[test]
    fn selector_filters_nodes() {
        let nodes = vec![
            node("a-0", &[("zone", "a")]),
            node("b-0", &[("zone", "b")]),
            node("a-1", &[("zone", "a")]),
        ];
        let resolver = TargetResolver::new(&LabelSelector::from_labels([("zone", "a")])).unwrap();
        let names: Vec<_> = resolver.resolve(&nodes).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a-0", "a-1"]);
    }

    #[test]
    fn control_plane_excluded_by_default() {
        let nodes = vec![
            node("cp-0", &[(CONTROL_PLANE_ROLE_LABEL, "")]),
            node("master-0", &[(MASTER_ROLE_LABEL, "")]),
            node("worker-0", &[]),
        ];
        let resolver = TargetResolver::new(&LabelSelector::default()).unwrap();
        let names: Vec<_> = resolver.resolve(&nodes).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["worker-0"]);
    }

    #[test]
    fn selector_naming_role_opts_control_plane_in() {
        let nodes = vec![
            node("cp-0", &[(CONTROL_PLANE_ROLE_LABEL, "")]),
            node("worker-0", &[]),
        ];
        let resolver = TargetResolver::new(&LabelSelector::exists(CONTROL_PLANE_ROLE_LABEL)).unwrap();
        let names: Vec<_> = resolver.resolve(&nodes).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["cp-0"]);
    }

    #[test]
    fn malformed_selector_is_an_error() {
        let selector = LabelSelector {
            match_expressions: vec![Requirement {
                key: "zone".to_string(),
                operator: Operator::In,
                values: Vec::new(),
            }],
            ..Default::default()
        };
        assert!(TargetResolver::new(&selector).is_err());
    }

    #[test]
    fn node_change_maps_to_old_and_new_policies() {
        let policies = vec![
            policy("zone-a", LabelSelector::from_labels([("zone", "a")])),
            policy("zone-b", LabelSelector::from_labels([("zone", "b")])),
            policy("zone-c", LabelSelector::from_labels([("zone", "c")])),
        ];
        let old = node("n", &[("zone", "a")]);
        let new = node("n", &[("zone", "b")]);

        let affected = policies_for_node_change(&policies, Some(&old), Some(&new));
        assert_eq!(
            affected,
            BTreeSet::from(["zone-a".to_string(), "zone-b".to_string()])
        );

        let deleted = policies_for_node_change(&policies, Some(&old), None);
        assert_eq!(deleted, BTreeSet::from(["zone-a".to_string()]));
    }

    #[test]
    fn node_change_skips_malformed_and_unrelated_policies() {
        let broken = LabelSelector::from_labels([("bad key", "x")]);
        let policies = vec![
            policy("broken", broken),
            policy("zone-b", LabelSelector::from_labels([("zone", "b")])),
        ];
        let created = node("n", &[("zone", "a")]);
        assert!(policies_for_node_change(&policies, None, Some(&created)).is_empty());
    }
}
