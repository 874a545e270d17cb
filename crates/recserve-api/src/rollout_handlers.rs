//! REST API handlers for rollout control and model hot-swap.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use recserve_models::SwitchResult;
use recserve_registry::RegistryEntry;
use recserve_rollout::{RolloutConfig, RolloutError, RolloutUpdate, Strategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, manager_error_status};

/// Serializable rollout status for API responses.
#[derive(Serialize)]
pub struct RolloutStatus {
    #[serde(flatten)]
    pub config: RolloutConfig,
    pub effective_strategy: Strategy,
    pub active_version: Option<String>,
    pub cached_versions: Vec<String>,
}

/// GET /rollout/status
pub async fn rollout_status(State(state): State<ApiState>) -> impl IntoResponse {
    let config = state.rollout.snapshot().await;
    ApiResponse::ok(RolloutStatus {
        effective_strategy: config.effective_strategy(),
        config,
        active_version: state.models.active_version().await,
        cached_versions: state.models.cached_versions().await,
    })
}

/// POST /rollout/update
pub async fn update_rollout(
    State(state): State<ApiState>,
    Json(update): Json<RolloutUpdate>,
) -> impl IntoResponse {
    match state.rollout.update(&update).await {
        Ok(config) => ApiResponse::ok(config).into_response(),
        Err(e @ RolloutError::InvalidStrategy(_)) => {
            warn!(error = %e, "rejected rollout update");
            error_response(&e.to_string(), StatusCode::BAD_REQUEST)
        }
    }
}

/// Request body to switch the active model.
#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub version: String,
}

/// Query form of a switch request.
#[derive(Debug, Deserialize)]
pub struct SwitchQuery {
    pub model: String,
}

/// Outcome of a successful switch.
#[derive(Serialize)]
pub struct SwitchResponse {
    pub status: &'static str,
    pub model_name: String,
    pub previous_version: Option<String>,
    pub new_version: String,
    pub registry_metadata: RegistryEntry,
}

impl From<SwitchResult> for SwitchResponse {
    fn from(r: SwitchResult) -> Self {
        Self {
            status: "ok",
            model_name: r.model_name,
            previous_version: r.previous_version,
            new_version: r.new_version,
            registry_metadata: r.registry_metadata,
        }
    }
}

/// POST /switch
pub async fn switch_model(
    State(state): State<ApiState>,
    Json(req): Json<SwitchRequest>,
) -> impl IntoResponse {
    switch_to(&state, &req.version).await
}

/// GET /switch?model=v0.3
pub async fn switch_from_query(
    State(state): State<ApiState>,
    Query(query): Query<SwitchQuery>,
) -> impl IntoResponse {
    switch_to(&state, &query.model).await
}

async fn switch_to(state: &ApiState, version: &str) -> axum::response::Response {
    let version = version.trim();
    if version.is_empty() {
        return error_response("version must not be empty", StatusCode::BAD_REQUEST);
    }

    // Primary routing follows the active model in switch order.
    let rollout = state.rollout.clone();
    let switched = state
        .models
        .switch_with(version, |new_version| async move {
            rollout.set_primary_version(&new_version).await;
        })
        .await;

    match switched {
        Ok(result) => {
            info!(
                previous = result.previous_version.as_deref().unwrap_or("none"),
                new = %result.new_version,
                "operator switch applied"
            );
            ApiResponse::ok(SwitchResponse::from(result)).into_response()
        }
        Err(e) => error_response(&e.to_string(), manager_error_status(&e)),
    }
}
