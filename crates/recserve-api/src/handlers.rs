//! Serving handlers: health, recommendations, traces and metrics.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use recserve_metrics::{MetricsCollector, render_prometheus};
use recserve_models::{ManagerError, ModelVersionManager};
use recserve_registry::RegistryError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ApiState;
use crate::middleware::RequestId;
use crate::trace::TraceRecord;

const DEFAULT_K: usize = 20;
const MAX_K: usize = 500;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub(crate) fn manager_error_status(err: &ManagerError) -> StatusCode {
    match err {
        ManagerError::VersionNotFound(_) => StatusCode::NOT_FOUND,
        ManagerError::LoadError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ManagerError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct Health {
    status: &'static str,
    model_name: String,
    version: String,
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    match state.models.active_version().await {
        Some(version) => ApiResponse::ok(Health {
            status: "ok",
            model_name: state.models.model_name().to_string(),
            version,
        })
        .into_response(),
        None => error_response(
            &ManagerError::NotInitialized.to_string(),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
    }
}

// ── Recommendations ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    #[serde(default = "default_k")]
    pub k: usize,
    /// Optional model name; must match the served model.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_k() -> usize {
    DEFAULT_K
}

#[derive(Debug, Serialize)]
pub struct Provenance {
    pub request_id: String,
    pub timestamp: u64,
    pub model_name: String,
    pub model_version: String,
    pub variant: Option<&'static str>,
    pub git_sha: String,
    pub data_snapshot_id: String,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct Recommendations {
    pub user_id: u64,
    pub items: Vec<u64>,
    pub provenance: Provenance,
}

/// GET /recommend/{user_id}?k=20&model=als
pub async fn recommend(
    State(state): State<ApiState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(user_id): Path<u64>,
    Query(query): Query<RecommendQuery>,
) -> impl IntoResponse {
    let started = Instant::now();

    if query.k == 0 || query.k > MAX_K {
        return error_response(
            &format!("k must be between 1 and {MAX_K}"),
            StatusCode::BAD_REQUEST,
        );
    }

    if let Some(model) = query.model.as_deref() {
        if !model.trim().eq_ignore_ascii_case(state.models.model_name()) {
            return error_response(
                &format!("model {model:?} is not served here (serving {})", state.models.model_name()),
                StatusCode::BAD_REQUEST,
            );
        }
    }

    let config = state.rollout.snapshot().await;
    let decision = recserve_rollout::route(&config, user_id);
    let variant = decision.variant_label();
    let metric_variant = variant.unwrap_or("none");
    debug!(
        %request_id,
        user_id,
        served_version = %decision.served_version,
        variant = metric_variant,
        "routed request"
    );

    if let Some(shadow_version) = decision.shadow_version.clone() {
        spawn_shadow(
            Arc::clone(&state.models),
            Arc::clone(&state.metrics),
            shadow_version,
            user_id,
            query.k,
        );
    }

    let model = match state.models.get_or_load(&decision.served_version).await {
        Ok(model) => model,
        Err(e) => {
            let status = manager_error_status(&e);
            warn!(%request_id, error = %e, "served version unavailable");
            state
                .metrics
                .record_request(metric_variant, status.as_u16(), started.elapsed());
            return error_response(&e.to_string(), status);
        }
    };

    let items = match model.recommend(user_id, query.k) {
        Ok(items) => items,
        Err(e) => {
            let status = match &e {
                RegistryError::UnknownUser(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(%request_id, version = %model.version(), error = %e, "recommend failed");
            }
            state
                .metrics
                .record_request(metric_variant, status.as_u16(), started.elapsed());
            return error_response(&e.to_string(), status);
        }
    };

    let latency = started.elapsed();
    let latency_ms = latency.as_millis() as u64;
    state
        .metrics
        .record_request(metric_variant, StatusCode::OK.as_u16(), latency);

    state
        .traces
        .store(TraceRecord {
            request_id: request_id.clone(),
            user_id,
            model_name: model.key.model_name.clone(),
            model_version: model.version().to_string(),
            variant: variant.map(str::to_string),
            shadow_version: decision.shadow_version.clone(),
            git_sha: model.entry.git_sha.clone(),
            data_snapshot_id: model.entry.data_snapshot_id.clone(),
            environment: config.environment().to_string(),
            item_count: items.len(),
            latency_ms,
            stored_at: 0,
        })
        .await;

    ApiResponse::ok(Recommendations {
        user_id,
        items,
        provenance: Provenance {
            request_id,
            timestamp: epoch_secs(),
            model_name: model.key.model_name.clone(),
            model_version: model.version().to_string(),
            variant,
            git_sha: model.entry.git_sha.clone(),
            data_snapshot_id: model.entry.data_snapshot_id.clone(),
            latency_ms,
        },
    })
    .into_response()
}

/// Invoke the shadow version in its own task. The outcome is only logged
/// and counted; it never reaches the caller.
fn spawn_shadow(
    models: Arc<ModelVersionManager>,
    metrics: Arc<MetricsCollector>,
    version: String,
    user_id: u64,
    k: usize,
) {
    tokio::spawn(async move {
        let outcome = match models.get_or_load(&version).await {
            Ok(model) => model.recommend(user_id, k).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match outcome {
            Ok(items) => {
                debug!(%version, user_id, items = items.len(), "shadow call completed");
                metrics.record_shadow(&version, true);
            }
            Err(error) => {
                warn!(%version, user_id, %error, "shadow call failed");
                metrics.record_shadow(&version, false);
            }
        }
    });
}

// ── Traces ─────────────────────────────────────────────────────

/// GET /trace/{request_id}
pub async fn get_trace(
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    match state.traces.get(&request_id).await {
        Some(trace) => ApiResponse::ok(serde_json::json!({
            "request_id": request_id,
            "trace": trace,
        }))
        .into_response(),
        None => error_response("trace not found", StatusCode::NOT_FOUND),
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_prometheus(&state.metrics),
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
