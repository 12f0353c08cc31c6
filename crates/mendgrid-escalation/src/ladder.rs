//! Remediation ladders: ordered rungs built from a policy spec.

use std::collections::HashSet;

use mendgrid_core::{parse_secs, DurationError, PolicySpec, TemplateRef};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("policy names no remediation template")]
    Empty,

    #[error("remediation template and escalating remediations are both set")]
    Ambiguous,

    #[error("duplicate escalation order {0}")]
    DuplicateOrder(i32),

    /// Two rungs resolve to the same remediation kind and so to one handle.
    #[error("remediation kind {0} appears on more than one rung")]
    DuplicateKind(String),

    #[error("escalation order {order}: {source}")]
    Timeout {
        order: i32,
        #[source]
        source: DurationError,
    },
}

/// One rung of a ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderStep {
    pub template: TemplateRef,
    pub order: i32,
    /// `None` for a non-escalating template, which never times out.
    pub timeout_secs: Option<u64>,
}

/// Rungs sorted by ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    steps: Vec<LadderStep>,
}

impl Ladder {
    pub fn from_spec(spec: &PolicySpec) -> Result<Self, LadderError> {
        match (&spec.remediation_template, spec.escalating_remediations.is_empty()) {
            (Some(_), false) => Err(LadderError::Ambiguous),
            (None, true) => Err(LadderError::Empty),
            (Some(template), true) => Ok(Self {
                steps: vec![LadderStep {
                    template: template.clone(),
                    order: 0,
                    timeout_secs: None,
                }],
            }),
            (None, false) => {
                let mut steps = spec
                    .escalating_remediations
                    .iter()
                    .map(|r| -> Result<LadderStep, LadderError> {
                        let timeout = parse_secs(&r.timeout).map_err(|source| LadderError::Timeout {
                            order: r.order,
                            source,
                        })?;
                        Ok(LadderStep {
                            template: r.template.clone(),
                            order: r.order,
                            timeout_secs: Some(timeout),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                steps.sort_by_key(|s| s.order);
                if let Some(pair) = steps.windows(2).find(|w| w[0].order == w[1].order) {
                    return Err(LadderError::DuplicateOrder(pair[0].order));
                }
                let mut kinds = HashSet::new();
                if let Some(step) = steps.iter().find(|s| !kinds.insert(s.template.remediation_kind())) {
                    return Err(LadderError::DuplicateKind(step.template.remediation_kind().to_string()));
                }
                Ok(Self { steps })
            }
        }
    }

    /// The rung every remediation starts with.
    pub fn first(&self) -> Option<&LadderStep> {
        self.steps.first()
    }

    /// The rung with the lowest order strictly greater than `order`.
    pub fn next_after(&self, order: i32) -> Option<&LadderStep> {
        self.steps.iter().find(|s| s.order > order)
    }

    pub fn step(&self, order: i32) -> Option<&LadderStep> {
        self.steps.iter().find(|s| s.order == order)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
