use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    membership::{
        dto::{ErrorResponse, LoginRequest, LoginResponse, PublicUser, RegisterRequest, RegisterResponse},
        errors::{AuthenticationError, RegistrationError},
        extractors::ApiKeyUser,
        services::{AuthenticateInput, RegisterInput},
    },
    state::AppState,
};

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

// Every body rejection (syntax, missing field, content type) gets the same 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(v)| v).map_err(|e| {
        warn!(error = %e, status = %e.status(), "invalid request body");
        api_error(StatusCode::BAD_REQUEST, "Invalid request body")
    })
}

impl From<RegistrationError> for ApiError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
            RegistrationError::DuplicateEmail => api_error(StatusCode::CONFLICT, e.to_string()),
            RegistrationError::Internal(_) | RegistrationError::Persistence(_) => {
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

impl From<AuthenticationError> for ApiError {
    fn from(e: AuthenticationError) -> Self {
        match e {
            AuthenticationError::InvalidCredentials => api_error(StatusCode::UNAUTHORIZED, e.to_string()),
            AuthenticationError::AccountDeactivated => api_error(StatusCode::FORBIDDEN, e.to_string()),
            AuthenticationError::Internal(_) | AuthenticationError::Persistence(_) => {
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/api/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let payload = body(payload)?;
    let out = state
        .register
        .execute(RegisterInput {
            email: payload.email,
            name: payload.name,
            password: payload.password,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(out.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let payload = body(payload)?;
    let out = state
        .authenticate
        .execute(AuthenticateInput {
            email: payload.email,
            password: payload.password,
        })
        .await?;
    Ok(Json(out.into()))
}

#[instrument(skip_all)]
pub async fn get_me(ApiKeyUser(user): ApiKeyUser) -> Json<PublicUser> {
    Json(user.into())
}
