use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use tracing::{error, warn};

use super::{dto::ErrorResponse, repo_types::User};
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolves the caller from its API key and refuses deactivated accounts.
pub struct ApiKeyUser(pub User);

fn reject(status: StatusCode, msg: &str) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: msg.into() }))
}

fn api_key_from(parts: &Parts) -> Option<&str> {
    if let Some(v) = parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
    {
        return Some(v.trim());
    }
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
}

#[async_trait]
impl FromRequestParts<AppState> for ApiKeyUser {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = api_key_from(parts)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing API key"))?;

        let user = match state.users.find_by_api_key(key).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!("unknown api key");
                return Err(reject(StatusCode::UNAUTHORIZED, "invalid API key"));
            }
            Err(e) => {
                error!(error = %e, "find_by_api_key failed");
                return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"));
            }
        };

        if !user.is_active {
            warn!(user_id = %user.id, "api key of deactivated account");
            return Err(reject(StatusCode::FORBIDDEN, "account is deactivated"));
        }

        Ok(ApiKeyUser(user))
    }
}
