use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use job_tracker_storage::Database;

use crate::{applications, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database) -> Self {
        Self {
            metrics,
            storage,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/metrics", get(metrics))
        .route(
            "/applications",
            get(applications::list).post(applications::create),
        )
        .route(
            "/applications/:id",
            get(applications::get)
                .put(applications::update)
                .delete(applications::delete),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Accepts any origin with credentials by mirroring the request's `Origin`,
/// since browsers refuse a literal `*` once credentials are allowed.
// TODO: restrict to the deployed frontend origin once it has a stable URL.
fn cors_layer() -> CorsLayer {
    CorsLayer::very_permissive()
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    message: &'static str,
}

async fn health_check() -> Json<Health> {
    Json(Health {
        status: "healthy",
        message: "Job Tracker API is running",
    })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
pub(crate) async fn test_state() -> (AppState, tempfile::TempDir) {
    let metrics = telemetry::init_metrics().expect("metrics init");

    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    let database = Database::connect(&url).await.expect("connect");
    database.ensure_schema().await.expect("schema");

    (AppState::new(metrics, database), dir)
}
