//! mendgrid-api — REST API for MendGrid.
//!
//! Provides axum route handlers for managing remediation policies, reporting
//! nodes and legacy health checks, inspecting remediation handles, and
//! reviewing policy writes against the admission rules.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/policies` | List all policies |
//! | POST | `/api/v1/policies` | Create a policy (admission checked) |
//! | GET | `/api/v1/policies/{name}` | Get a policy with its status |
//! | PUT | `/api/v1/policies/{name}` | Replace a policy spec (admission checked) |
//! | DELETE | `/api/v1/policies/{name}` | Delete a policy (admission checked) |
//! | GET | `/api/v1/nodes` | List nodes |
//! | GET | `/api/v1/nodes/{name}` | Get a node |
//! | PUT | `/api/v1/nodes/{name}` | Report a node and its conditions |
//! | DELETE | `/api/v1/nodes/{name}` | Remove a node |
//! | GET | `/api/v1/legacy-checks` | List legacy health checks |
//! | POST | `/api/v1/legacy-checks` | Create or replace a legacy health check |
//! | DELETE | `/api/v1/legacy-checks/{namespace}/{name}` | Delete a legacy health check |
//! | GET | `/api/v1/remediations` | List remediation handles |
//! | GET | `/api/v1/cluster/upgrade` | Read the cluster upgrade flag |
//! | PUT | `/api/v1/cluster/upgrade` | Set the cluster upgrade flag |
//! | POST | `/admission/policies` | Review a policy write without applying it |

pub mod admission;
pub mod handlers;

use axum::Router;
use axum::routing::{delete, get, post};
use mendgrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

/// Build the complete API router (REST + admission review).
pub fn build_router(store: StateStore) -> Router {
    let api_state = ApiState { store };

    let api_routes = Router::new()
        .route("/policies", get(handlers::list_policies).post(handlers::create_policy))
        .route(
            "/policies/{name}",
            get(handlers::get_policy)
                .put(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        .route("/nodes", get(handlers::list_nodes))
        .route(
            "/nodes/{name}",
            get(handlers::get_node).put(handlers::put_node).delete(handlers::delete_node),
        )
        .route(
            "/legacy-checks",
            get(handlers::list_legacy_checks).post(handlers::put_legacy_check),
        )
        .route("/legacy-checks/{namespace}/{name}", delete(handlers::delete_legacy_check))
        .route("/remediations", get(handlers::list_remediations))
        .route(
            "/cluster/upgrade",
            get(handlers::get_cluster_upgrade).put(handlers::set_cluster_upgrade),
        )
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/admission/policies", post(admission::review_policy).with_state(api_state))
}
