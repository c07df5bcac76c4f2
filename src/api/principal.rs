//! Request identity supplied by the host's auth layer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use super::state::AppState;
use super::ApiError;
use crate::bundle::Principal;

pub const HEADER_LOGIN: &str = "x-principal-login";
pub const HEADER_USER_ID: &str = "x-principal-id";
pub const HEADER_SERVER_ADMIN: &str = "x-principal-server-admin";

/// The authenticated caller. Enforces `server_admin_only` on extraction.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let login = header(HEADER_LOGIN)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing request identity"))?;

        let mut principal = Principal::new(login)
            .with_server_admin(header(HEADER_SERVER_ADMIN).is_some_and(|v| v.eq_ignore_ascii_case("true")));

        if let Some(id) = header(HEADER_USER_ID) {
            let id = id
                .parse()
                .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid principal id"))?;
            principal = principal.with_user_id(id);
        }

        if state.service.settings().server_admin_only && !principal.is_server_admin {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "support bundles are restricted to server administrators",
            ));
        }

        Ok(CurrentUser(principal))
    }
}
