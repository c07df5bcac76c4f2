//! API layer -- axum routes, handlers, and request identity.

mod principal;
mod routes;
pub mod state;

pub use self::principal::{CurrentUser, HEADER_LOGIN, HEADER_SERVER_ADMIN, HEADER_USER_ID};

use self::state::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::bundle::BundleError;

/// Build the application router with all API routes.
///
/// Support bundle routes are only mounted when the feature is enabled.
pub fn router(state: AppState) -> Router {
    let enabled = state.service.settings().enabled;

    Router::new()
        .nest("/api/v1", routes::api_routes(enabled))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Error returned by handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<BundleError> for ApiError {
    fn from(e: BundleError) -> Self {
        let status = match &e {
            BundleError::NotFound { .. } => StatusCode::NOT_FOUND,
            BundleError::InvalidState { .. } => StatusCode::CONFLICT,
            BundleError::Store(_) | BundleError::CollectionFault(_) => {
                tracing::error!(error = %e, "Support bundle request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
