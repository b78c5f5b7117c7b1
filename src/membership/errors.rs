use thiserror::Error;

/// Failures surfaced by a [`UserRepository`](super::repo::UserRepository).
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("user not found")]
    NotFound,
    /// A unique constraint (email or API key) rejected the write.
    #[error("user already exists")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0}")]
    Validation(String),
    #[error("user with this email already exists")]
    DuplicateEmail,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("failed to persist user: {0}")]
    Persistence(#[source] RepoError),
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Same error for unknown email and wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is deactivated")]
    AccountDeactivated,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("failed to load user: {0}")]
    Persistence(#[source] RepoError),
}
