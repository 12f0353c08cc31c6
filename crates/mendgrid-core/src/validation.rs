//! Admission rules for remediation policies and legacy health checks.
//!
//! These run synchronously at the API boundary before anything is stored.
//! The rules are written once against `AdmissionTarget` so every kind that
//! carries a selector, unhealthy conditions, and (optionally) a remediation
//! ladder is validated the same way.
//!
//! Every rejection names the offending field so callers can tell violation
//! classes apart without parsing free text.

use std::collections::HashSet;

use thiserror::Error;

use crate::duration::parse_duration;
use crate::selector::LabelSelector;
use crate::types::*;

/// Message fragment carried by every rejection caused by in-flight remediation.
pub const ONGOING_REMEDIATION_ERROR: &str = "prohibited due to running remediation";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// A field fails a syntactic rule.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The change is not allowed while remediation is in flight.
    #[error("{field} {action} prohibited due to running remediation")]
    OngoingRemediation {
        field: &'static str,
        action: &'static str,
    },
}

impl AdmissionError {
    fn invalid(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the field that caused the rejection.
    pub fn field(&self) -> &str {
        match self {
            Self::Invalid { field, .. } => field,
            Self::OngoingRemediation { field, .. } => field,
        }
    }
}

/// Fields the admission rules need from any health-check kind.
pub trait AdmissionTarget {
    fn selector(&self) -> &LabelSelector;

    fn unhealthy_conditions(&self) -> &[UnhealthyCondition];

    fn min_healthy(&self) -> Option<&MinHealthy> {
        None
    }

    fn remediation_template(&self) -> Option<&TemplateRef> {
        None
    }

    fn escalating_remediations(&self) -> &[EscalatingRemediation] {
        &[]
    }

    /// Whether the kind must name at least one remediation template.
    fn requires_remediation(&self) -> bool {
        false
    }

    fn pause_requests(&self) -> &[String] {
        &[]
    }

    /// Number of nodes with remediation currently in flight.
    fn in_flight(&self) -> usize {
        0
    }
}

impl AdmissionTarget for Policy {
    fn selector(&self) -> &LabelSelector {
        &self.spec.selector
    }

    fn unhealthy_conditions(&self) -> &[UnhealthyCondition] {
        &self.spec.unhealthy_conditions
    }

    fn min_healthy(&self) -> Option<&MinHealthy> {
        self.spec.min_healthy.as_ref()
    }

    fn remediation_template(&self) -> Option<&TemplateRef> {
        self.spec.remediation_template.as_ref()
    }

    fn escalating_remediations(&self) -> &[EscalatingRemediation] {
        &self.spec.escalating_remediations
    }

    fn requires_remediation(&self) -> bool {
        true
    }

    fn pause_requests(&self) -> &[String] {
        &self.spec.pause_requests
    }

    fn in_flight(&self) -> usize {
        self.status
            .unhealthy_nodes
            .iter()
            .filter(|n| n.is_in_flight())
            .count()
            .max(self.status.in_flight_remediations as usize)
    }
}

impl AdmissionTarget for LegacyHealthCheck {
    fn selector(&self) -> &LabelSelector {
        &self.selector
    }

    fn unhealthy_conditions(&self) -> &[UnhealthyCondition] {
        &self.unhealthy_conditions
    }
}

/// Validate an object on create (and as the first half of update).
pub fn validate_create<T: AdmissionTarget>(obj: &T) -> Result<(), AdmissionError> {
    obj.selector()
        .compile()
        .map_err(|e| AdmissionError::invalid("Selector", e))?;

    if obj.requires_remediation() && obj.unhealthy_conditions().is_empty() {
        return Err(AdmissionError::invalid(
            "UnhealthyConditions",
            "at least one condition is required",
        ));
    }

    for (i, cond) in obj.unhealthy_conditions().iter().enumerate() {
        if cond.type_.trim().is_empty() {
            return Err(AdmissionError::invalid(
                format!("UnhealthyConditions[{i}].Type"),
                "must not be empty",
            ));
        }
        parse_duration(&cond.duration)
            .map_err(|e| AdmissionError::invalid(format!("UnhealthyConditions[{i}].Duration"), e))?;
    }

    if let Some(min) = obj.min_healthy() {
        min.validate()
            .map_err(|e| AdmissionError::invalid("MinHealthy", e))?;
    }

    validate_remediations(obj)?;

    if obj.pause_requests().iter().any(|r| r.trim().is_empty()) {
        return Err(AdmissionError::invalid(
            "PauseRequests",
            "entries must not be empty",
        ));
    }

    Ok(())
}

/// Validate a modification of `old` into `new`.
pub fn validate_update<T: AdmissionTarget>(old: &T, new: &T) -> Result<(), AdmissionError> {
    validate_create(new)?;

    if old.in_flight() == 0 {
        return Ok(());
    }
    if old.selector() != new.selector() {
        return Err(AdmissionError::OngoingRemediation {
            field: "Selector",
            action: "update",
        });
    }
    if old.remediation_template() != new.remediation_template()
        || old.escalating_remediations() != new.escalating_remediations()
    {
        return Err(AdmissionError::OngoingRemediation {
            field: "RemediationTemplate",
            action: "update",
        });
    }
    Ok(())
}

/// Validate removal of an object.
pub fn validate_delete<T: AdmissionTarget>(obj: &T) -> Result<(), AdmissionError> {
    if obj.in_flight() > 0 {
        return Err(AdmissionError::OngoingRemediation {
            field: "Policy",
            action: "deletion",
        });
    }
    Ok(())
}

fn validate_remediations<T: AdmissionTarget>(obj: &T) -> Result<(), AdmissionError> {
    let classic = obj.remediation_template();
    let ladder = obj.escalating_remediations();

    match (classic.is_some(), ladder.is_empty()) {
        (true, false) => {
            return Err(AdmissionError::invalid(
                "RemediationTemplate",
                "RemediationTemplate and EscalatingRemediations are mutually exclusive",
            ));
        }
        (false, true) if obj.requires_remediation() => {
            return Err(AdmissionError::invalid(
                "RemediationTemplate",
                "one of RemediationTemplate or EscalatingRemediations must be set",
            ));
        }
        _ => {}
    }

    if let Some(template) = classic {
        validate_template("RemediationTemplate", template)?;
    }

    let mut orders = HashSet::new();
    let mut templates = HashSet::new();
    let mut kinds = HashSet::new();
    for (i, step) in ladder.iter().enumerate() {
        let field = format!("EscalatingRemediations[{i}]");
        validate_template(&format!("{field}.Template"), &step.template)?;

        if !orders.insert(step.order) {
            return Err(AdmissionError::invalid(
                format!("{field}.Order"),
                format!("duplicate order {}", step.order),
            ));
        }
        if !templates.insert(&step.template) {
            return Err(AdmissionError::invalid(
                format!("{field}.Template"),
                "each template may appear only once",
            ));
        }
        // Handles are keyed by kind and node, so two rungs of one kind
        // would share a single remediation object.
        if !kinds.insert(step.template.remediation_kind()) {
            return Err(AdmissionError::invalid(
                format!("{field}.Template"),
                format!(
                    "remediation kind {} is already used by another step",
                    step.template.remediation_kind()
                ),
            ));
        }

        let timeout = parse_duration(&step.timeout)
            .map_err(|e| AdmissionError::invalid(format!("{field}.Timeout"), e))?;
        if timeout.is_zero() {
            return Err(AdmissionError::invalid(
                format!("{field}.Timeout"),
                "must be greater than zero",
            ));
        }
    }
    Ok(())
}

fn validate_template(field: &str, template: &TemplateRef) -> Result<(), AdmissionError> {
    if template.kind.trim().is_empty() {
        return Err(AdmissionError::invalid(format!("{field}.Kind"), "must not be empty"));
    }
    if template.api_version.trim().is_empty() {
        return Err(AdmissionError::invalid(
            format!("{field}.APIVersion"),
            "must not be empty",
        ));
    }
    if template.name.trim().is_empty() {
        return Err(AdmissionError::invalid(format!("{field}.Name"), "must not be empty"));
    }
    Ok(())
}
