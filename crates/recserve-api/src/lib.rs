//! recserve-api: REST API for the recommender service.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness + active model version |
//! | GET | `/recommend/{user_id}?k=20` | Routed top-k recommendations with provenance |
//! | GET | `/trace/{request_id}` | Stored provenance trace |
//! | GET | `/rollout/status` | Rollout config + active version |
//! | POST | `/rollout/update` | Merge a partial rollout update |
//! | POST | `/switch` | Hot-swap the active model (`{"version": ...}`) |
//! | GET | `/switch?model=v0.3` | Same, query-string form |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod middleware;
pub mod rollout_handlers;
pub mod trace;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use recserve_metrics::MetricsCollector;
use recserve_models::ModelVersionManager;
use recserve_rollout::SharedRollout;

pub use middleware::{REQUEST_ID_HEADER, RequestId};
pub use trace::{TraceRecord, TraceStore};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub rollout: SharedRollout,
    pub models: Arc<ModelVersionManager>,
    pub metrics: Arc<MetricsCollector>,
    pub traces: Arc<TraceStore>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/recommend/{user_id}", get(handlers::recommend))
        .route("/trace/{request_id}", get(handlers::get_trace))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/rollout/status", get(rollout_handlers::rollout_status))
        .route("/rollout/update", post(rollout_handlers::update_rollout))
        .route(
            "/switch",
            get(rollout_handlers::switch_from_query).post(rollout_handlers::switch_model),
        )
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}
