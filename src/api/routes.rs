//! API route definitions.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::principal::CurrentUser;
use super::state::AppState;
use super::ApiError;
use crate::bundle::{BundleError, BundleState};

pub fn api_routes(support_bundles_enabled: bool) -> Router<AppState> {
    let router = Router::new().route("/health", get(health));
    if !support_bundles_enabled {
        return router;
    }

    router
        .route("/support-bundles", get(list_bundles).post(create_bundle))
        .route("/support-bundles/collectors", get(list_collectors))
        .route("/support-bundles/{uid}", get(get_bundle).delete(delete_bundle))
        .route("/support-bundles/{uid}/download", get(download_bundle))
        .route("/usage-stats", get(usage_stats))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    collectors: Vec<String>,
}

async fn create_bundle(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let bundle = state.service.create(request.collectors, &principal).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": bundle }))))
}

async fn list_bundles(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let bundles = state.service.list().await?;
    Ok(Json(json!({ "data": bundles, "meta": { "total": bundles.len() } })))
}

async fn list_collectors(State(state): State<AppState>, _user: CurrentUser) -> Json<Value> {
    Json(json!({ "data": state.service.registry().list() }))
}

async fn get_bundle(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(uid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let bundle = state.service.get(&uid).await?;
    Ok(Json(json!({ "data": bundle })))
}

async fn download_bundle(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = state.service.get(&uid).await?;
    let filename = bundle.download_filename();

    let archive = match (bundle.state, bundle.archive) {
        (BundleState::Complete, Some(archive)) => archive,
        (state, _) => return Err(BundleError::InvalidState { uid, state }.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/zstd".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        archive,
    ))
}

async fn delete_bundle(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(uid): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.remove(&uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn usage_stats(State(state): State<AppState>, _user: CurrentUser) -> Json<Value> {
    Json(json!({ "data": state.service.usage_stats().await }))
}
