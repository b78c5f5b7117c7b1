use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo_types::User,
    services::{AuthenticateOutput, RegisterOutput},
};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub api_key: String,
    pub message: String,
}

impl From<RegisterOutput> for RegisterResponse {
    fn from(o: RegisterOutput) -> Self {
        Self {
            user_id: o.user_id,
            email: o.email,
            name: o.name,
            api_key: o.api_key,
            message: "User registered successfully".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub api_key: String,
    pub is_active: bool,
    pub message: String,
}

impl From<AuthenticateOutput> for LoginResponse {
    fn from(o: AuthenticateOutput) -> Self {
        Self {
            user_id: o.user_id,
            email: o.email,
            name: o.name,
            api_key: o.api_key,
            is_active: o.is_active,
            message: "Login successful".into(),
        }
    }
}

/// Public part of the user returned to API key holders.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            is_active: u.is_active,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
