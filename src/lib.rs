//! Enrollment API Library
//!
//! Term enrollment, fee assessment and payment tracking behind a role-gated
//! HTTP API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{http::StatusCode, response::Json, Extension, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::auth::{AccessPolicy, AuthConfig, AuthService, PolicyError};
use crate::events::EventSender;
use crate::services::Page;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub policy: Arc<AccessPolicy>,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires the services, token verifier and access table from configuration.
    /// Fails only when the configured access overrides name an unknown role
    /// or category.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<EventSender>,
    ) -> Result<Self, PolicyError> {
        let policy = Arc::new(AccessPolicy::from_config(&config.access)?);
        let auth = Arc::new(AuthService::new(AuthConfig::from(&config)));
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), config.workflow.clone());

        Ok(Self {
            db,
            config,
            event_sender,
            auth,
            policy,
            services,
        })
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> From<Page<T>> for PaginatedResponse<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages: page.total_pages,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Versioned workflow routes; every group carries its own access gate
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/enrollments", handlers::enrollments::enrollment_routes())
        .nest("/assessments", handlers::assessments::assessment_routes())
        .nest("/payments", handlers::payments::payment_routes())
        .merge(handlers::catalog::catalog_routes())
}

async fn route_not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error("Route not found".to_string())),
    )
}

/// Full application router: API, health probes and the OpenAPI document,
/// with auth extensions, tracing, timeout and compression applied. CORS is
/// left to the binary since it depends on the deployment.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::openapi_routes())
        .fallback(route_not_found)
        .with_state(state.clone())
        .merge(health::health_routes_with_state(state.db.clone()))
        .layer(Extension(state.auth.clone()))
        .layer(Extension(state.policy.clone()))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}
