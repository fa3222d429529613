/*!
 * # Health Check Module
 *
 * - `/health` reports that the process is up, with version and uptime
 * - `/health/ready` additionally pings the database and answers 503 when it
 *   cannot be reached
 *
 * Neither endpoint requires authentication.
 */

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<HealthStatus>,
    pub timestamp: DateTime<Utc>,
}

pub struct HealthState {
    db: Arc<DatabaseConnection>,
    started: Instant,
}

impl HealthState {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn info(&self, status: HealthStatus, database: Option<HealthStatus>) -> HealthInfo {
        HealthInfo {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime(),
            database,
            timestamp: Utc::now(),
        }
    }
}

/// Liveness: the process answers
pub async fn health_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.info(HealthStatus::Up, None)))
}

/// Readiness: the database answers too
pub async fn readiness_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match crate::db::check_connection(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(state.info(HealthStatus::Up, Some(HealthStatus::Up))),
        ),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(state.info(HealthStatus::Down, Some(HealthStatus::Down))),
            )
        }
    }
}

pub fn health_routes_with_state<S>(db: Arc<DatabaseConnection>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let state = Arc::new(HealthState::new(db));
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .with_state(state)
}
