//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.
//! Policy writes pass the admission rules first; the reconciler never sees
//! a policy that was rejected here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{debug, info};

use mendgrid_core::validation::{validate_create, validate_delete, validate_update};
use mendgrid_core::{AdmissionError, LegacyHealthCheck, Node, Policy, PolicySpec};
use mendgrid_state::StateError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Syntactic violations are 422, in-flight protections are 409.
fn admission_error(e: &AdmissionError) -> axum::response::Response {
    let status = match e {
        AdmissionError::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AdmissionError::OngoingRemediation { .. } => StatusCode::CONFLICT,
    };
    error_response(&e.to_string(), status).into_response()
}

fn store_error(e: &StateError) -> axum::response::Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) | StateError::Conflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Policies ───────────────────────────────────────────────────

/// Create request body. Status is owned by the controller and never accepted.
#[derive(serde::Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub spec: PolicySpec,
}

/// GET /api/v1/policies
pub async fn list_policies(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_policies() {
        Ok(policies) => ApiResponse::ok(policies).into_response(),
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/policies/{name}
pub async fn get_policy(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_policy(&name) {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => store_error(&e),
    }
}

/// POST /api/v1/policies
pub async fn create_policy(
    State(state): State<ApiState>,
    Json(req): Json<CreatePolicyRequest>,
) -> impl IntoResponse {
    if req.name.trim().is_empty() {
        return error_response("policy name must not be empty", StatusCode::BAD_REQUEST)
            .into_response();
    }
    let policy = Policy::new(&req.name, req.spec);
    if let Err(e) = validate_create(&policy) {
        debug!(policy = %policy.name, field = e.field(), "policy create rejected");
        return admission_error(&e);
    }
    match state.store.create_policy(&policy) {
        Ok(created) => {
            info!(policy = %created.name, "policy created");
            (StatusCode::CREATED, ApiResponse::ok(created)).into_response()
        }
        Err(e) => store_error(&e),
    }
}

/// PUT /api/v1/policies/{name}
pub async fn update_policy(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(spec): Json<PolicySpec>,
) -> impl IntoResponse {
    let old = match state.store.get_policy(&name) {
        Ok(Some(policy)) => policy,
        Ok(None) => return error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return store_error(&e),
    };
    let new = Policy {
        spec,
        ..old.clone()
    };
    if let Err(e) = validate_update(&old, &new) {
        debug!(policy = %name, field = e.field(), "policy update rejected");
        return admission_error(&e);
    }
    // Pinned to the version that was validated, so a remediation started in
    // between turns into a conflict rather than slipping past the guard.
    match state
        .store
        .update_policy_spec(&name, &new.spec, Some(old.resource_version))
    {
        Ok(updated) => {
            info!(policy = %name, version = updated.resource_version, "policy updated");
            ApiResponse::ok(updated).into_response()
        }
        Err(e) => store_error(&e),
    }
}

/// DELETE /api/v1/policies/{name}
pub async fn delete_policy(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let policy = match state.store.get_policy(&name) {
        Ok(Some(policy)) => policy,
        Ok(None) => return error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return store_error(&e),
    };
    remove_policy(&state, &policy)
}

/// Admit and delete `policy` as read. The delete is pinned to the version
/// that passed admission, so a status write landing in between (a pass
/// starting remediation) answers 409 instead of removing a busy policy.
fn remove_policy(state: &ApiState, policy: &Policy) -> axum::response::Response {
    let name = &policy.name;
    if let Err(e) = validate_delete(policy) {
        debug!(policy = %name, "policy deletion rejected");
        return admission_error(&e);
    }
    match state.store.delete_policy(name, Some(policy.resource_version)) {
        Ok(true) => {
            info!(policy = %name, "policy deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => store_error(&e),
    }
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_nodes() {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/nodes/{name}
pub async fn get_node(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_node(&name) {
        Ok(Some(node)) => ApiResponse::ok(node).into_response(),
        Ok(None) => error_response("node not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => store_error(&e),
    }
}

/// PUT /api/v1/nodes/{name}
pub async fn put_node(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(node): Json<Node>,
) -> impl IntoResponse {
    if node.name != name {
        return error_response(
            &format!("node name {:?} does not match path {:?}", node.name, name),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    match state.store.put_node(&node) {
        Ok(()) => ApiResponse::ok(node).into_response(),
        Err(e) => store_error(&e),
    }
}

/// DELETE /api/v1/nodes/{name}
pub async fn delete_node(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_node(&name) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("node not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => store_error(&e),
    }
}

// ── Legacy health checks ───────────────────────────────────────

/// GET /api/v1/legacy-checks
pub async fn list_legacy_checks(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_legacy_checks() {
        Ok(checks) => ApiResponse::ok(checks).into_response(),
        Err(e) => store_error(&e),
    }
}

/// POST /api/v1/legacy-checks
pub async fn put_legacy_check(
    State(state): State<ApiState>,
    Json(check): Json<LegacyHealthCheck>,
) -> impl IntoResponse {
    if let Err(e) = validate_create(&check) {
        return admission_error(&e);
    }
    match state.store.put_legacy_check(&check) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(check)).into_response(),
        Err(e) => store_error(&e),
    }
}

/// DELETE /api/v1/legacy-checks/{namespace}/{name}
pub async fn delete_legacy_check(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.delete_legacy_check(&format!("{namespace}/{name}")) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("legacy check not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => store_error(&e),
    }
}

// ── Remediations ───────────────────────────────────────────────

/// GET /api/v1/remediations
pub async fn list_remediations(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_remediations() {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => store_error(&e),
    }
}

// ── Cluster ────────────────────────────────────────────────────

/// Cluster upgrade flag body.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct UpgradeFlag {
    pub upgrading: bool,
}

/// GET /api/v1/cluster/upgrade
pub async fn get_cluster_upgrade(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.cluster_upgrading() {
        Ok(upgrading) => ApiResponse::ok(UpgradeFlag { upgrading }).into_response(),
        Err(e) => store_error(&e),
    }
}

/// PUT /api/v1/cluster/upgrade
pub async fn set_cluster_upgrade(
    State(state): State<ApiState>,
    Json(flag): Json<UpgradeFlag>,
) -> impl IntoResponse {
    match state.store.set_cluster_upgrading(flag.upgrading) {
        Ok(()) => {
            info!(upgrading = flag.upgrading, "cluster upgrade flag changed");
            ApiResponse::ok(flag).into_response()
        }
        Err(e) => store_error(&e),
    }
}
