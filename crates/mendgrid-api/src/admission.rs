//! Admission review endpoint.
//!
//! Lets an outer API server ask whether a policy write would be accepted
//! without applying it. The answer comes from the same rules the policy
//! CRUD handlers enforce.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mendgrid_core::validation::{validate_create, validate_delete, validate_update};
use mendgrid_core::{AdmissionError, Policy};

use crate::handlers::error_response;
use crate::ApiState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// A write to review. `old_object` is required for update; delete accepts
/// the object in either field.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionRequest {
    pub operation: Operation,
    #[serde(default)]
    pub object: Option<Policy>,
    #[serde(default)]
    pub old_object: Option<Policy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdmissionResponse {
    fn from_result(result: Result<(), AdmissionError>) -> Self {
        match result {
            Ok(()) => Self {
                allowed: true,
                reason: None,
            },
            Err(e) => Self {
                allowed: false,
                reason: Some(e.to_string()),
            },
        }
    }
}

/// Run the admission rules for one request.
///
/// Returns `None` when the request lacks the objects its operation needs.
pub fn review(req: &AdmissionRequest) -> Option<AdmissionResponse> {
    let result = match req.operation {
        Operation::Create => validate_create(req.object.as_ref()?),
        Operation::Update => validate_update(req.old_object.as_ref()?, req.object.as_ref()?),
        Operation::Delete => validate_delete(req.old_object.as_ref().or(req.object.as_ref())?),
    };
    Some(AdmissionResponse::from_result(result))
}

/// POST /admission/policies
///
/// For update and delete the stored policy, when present, stands in for
/// `old_object` so in-flight protection uses the controller's view of status.
pub async fn review_policy(
    State(state): State<ApiState>,
    Json(mut req): Json<AdmissionRequest>,
) -> impl IntoResponse {
    if req.operation != Operation::Create {
        let name = req
            .old_object
            .as_ref()
            .or(req.object.as_ref())
            .map(|p| p.name.clone());
        if let Some(name) = name {
            match state.store.get_policy(&name) {
                Ok(Some(stored)) => req.old_object = Some(stored),
                Ok(None) => {}
                Err(e) => {
                    return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                        .into_response();
                }
            }
        }
    }

    match review(&req) {
        Some(resp) => {
            debug!(operation = ?req.operation, allowed = resp.allowed, "admission review");
            Json(resp).into_response()
        }
        None => error_response(
            "request is missing the object required by its operation",
            StatusCode::BAD_REQUEST,
        )
        .into_response(),
    }
}
