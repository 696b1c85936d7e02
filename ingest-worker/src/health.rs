use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use database_layer::DatabasePool;
use event_queue::ReliableQueue;
use serde::Serialize;

use crate::metrics::{MetricsSnapshot, WorkerMetrics};

/// Shared state behind the health endpoint.
#[derive(Clone)]
pub struct HealthState {
    pub db: DatabasePool,
    pub queue: ReliableQueue,
    pub metrics: Arc<WorkerMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub components: HashMap<String, String>,
    pub metrics: MetricsSnapshot,
}

/// Router exposing `GET /healthz`.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .with_state(state)
}

/// 200 `{status:"OK"}` when every component reports OK, 503 otherwise.
pub async fn health_check(
    State(state): State<HealthState>,
) -> (StatusCode, Json<HealthResponse>) {
    let mut components = HashMap::new();

    let db_ok = state.db.is_healthy().await;
    components.insert(
        "database".to_string(),
        (if db_ok { "OK" } else { "UNAVAILABLE" }).to_string(),
    );

    let queue_stats = state.queue.stats().await;
    components.insert(
        "queue".to_string(),
        (if queue_stats.is_ok() { "OK" } else { "UNAVAILABLE" }).to_string(),
    );
    if let Ok(stats) = &queue_stats {
        components.insert("queueDepth".to_string(), stats.ready.to_string());
        components.insert("deadLetterDepth".to_string(), stats.dead_letter.to_string());
    }

    let all_ok = db_ok && queue_stats.is_ok();
    let response = HealthResponse {
        status: (if all_ok { "OK" } else { "DEGRADED" }).to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        components,
        metrics: state.metrics.snapshot(),
    };

    let code = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
