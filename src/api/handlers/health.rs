use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use crate::AppState;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub temp_root: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let temp_root = state.config.temp_root.clone();
    let writable = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&temp_root)
            .and_then(|_| tempfile::tempfile_in(&temp_root))
            .is_ok()
    })
    .await
    .unwrap_or(false);

    Json(HealthResponse {
        status: if writable { "ok" } else { "degraded" }.to_string(),
        temp_root: if writable { "writable" } else { "unwritable" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
