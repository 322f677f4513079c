use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::api::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: ComponentHealth,
    cache: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(error),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Health check endpoint.
///
/// Returns 200 OK when the durable store and cache both respond, 503
/// otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.deps.db_pool),
    )
    .await
    {
        Ok(Ok(_)) => ComponentHealth::ok(),
        Ok(Err(e)) => ComponentHealth::failed(format!("query failed: {e}")),
        Err(_) => ComponentHealth::failed("query timeout (>5s)".to_string()),
    };

    let cache = match state.deps.cache.store().get("health:probe").await {
        Ok(_) => ComponentHealth::ok(),
        Err(e) => ComponentHealth::failed(format!("cache unreachable: {e}")),
    };

    let healthy = database.is_ok() && cache.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            database,
            cache,
        }),
    )
}
