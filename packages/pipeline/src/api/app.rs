//! Application setup and router configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::PipelineDeps;

use super::routes::{
    batch_status_handler, document_status_handler, health_handler, resubmit_document_handler,
    submit_batch_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<PipelineDeps>,
}

/// Build the Axum application router
pub fn build_app(deps: Arc<PipelineDeps>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/batches", post(submit_batch_handler))
        .route("/batches/:id", get(batch_status_handler))
        .route("/documents/:id", get(document_status_handler))
        .route("/documents/:id/resubmit", post(resubmit_document_handler))
        .layer(Extension(AppState { deps }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
