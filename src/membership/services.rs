use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    errors::{AuthenticationError, RegistrationError, RepoError},
    password::Hasher,
    repo::UserRepository,
    repo_types::{normalize_email, User},
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub struct RegisterInput {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutput {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub api_key: String,
}

pub struct AuthenticateInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateOutput {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub api_key: String,
    pub is_active: bool,
}

fn validate(email: &str, name: &str, password: &str) -> Result<(), RegistrationError> {
    if email.is_empty() {
        return Err(RegistrationError::Validation("email is required".into()));
    }
    if name.is_empty() {
        return Err(RegistrationError::Validation("name is required".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(RegistrationError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    // Deliberately minimal; the store is the source of truth for identity.
    if !email.contains('@') {
        return Err(RegistrationError::Validation("invalid email format".into()));
    }
    Ok(())
}

/// Creates an active user with a hashed password and a fresh API key.
#[derive(Clone)]
pub struct RegisterUser {
    users: Arc<dyn UserRepository>,
    hasher: Hasher,
}

impl RegisterUser {
    pub fn new(users: Arc<dyn UserRepository>, hasher: Hasher) -> Self {
        Self { users, hasher }
    }

    #[instrument(skip_all, fields(email = %input.email.trim()))]
    pub async fn execute(&self, input: RegisterInput) -> Result<RegisterOutput, RegistrationError> {
        let email = normalize_email(&input.email);
        let name = input.name.trim().to_string();

        if let Err(e) = validate(&email, &name, &input.password) {
            warn!(reason = %e, "registration rejected");
            return Err(e);
        }

        match self.users.find_by_email(&email).await {
            Ok(Some(_)) => {
                warn!("email already registered");
                return Err(RegistrationError::DuplicateEmail);
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "find_by_email failed");
                return Err(RegistrationError::Persistence(e));
            }
        }

        let hash = self.hasher.hash_blocking(input.password).await.map_err(|e| {
            error!(error = %e, "hash_password failed");
            RegistrationError::Internal("failed to hash password".into())
        })?;

        let user = User::new(email, name, hash);

        match self.users.create(&user).await {
            Ok(()) => {}
            // Lost a race with a concurrent registration for the same email.
            Err(RepoError::Conflict) => {
                warn!("email already registered (unique constraint)");
                return Err(RegistrationError::DuplicateEmail);
            }
            Err(e) => {
                error!(error = %e, "create user failed");
                return Err(RegistrationError::Persistence(e));
            }
        }

        info!(user_id = %user.id, "user registered");
        Ok(RegisterOutput {
            user_id: user.id,
            email: user.email,
            name: user.name,
            api_key: user.api_key,
        })
    }
}

/// Verifies email and password; never mutates the user.
#[derive(Clone)]
pub struct AuthenticateUser {
    users: Arc<dyn UserRepository>,
    hasher: Hasher,
}

impl AuthenticateUser {
    pub fn new(users: Arc<dyn UserRepository>, hasher: Hasher) -> Self {
        Self { users, hasher }
    }

    #[instrument(skip_all, fields(email = %input.email.trim()))]
    pub async fn execute(
        &self,
        input: AuthenticateInput,
    ) -> Result<AuthenticateOutput, AuthenticationError> {
        let email = normalize_email(&input.email);

        let user = match self.users.find_by_email(&email).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!("login unknown email");
                return Err(AuthenticationError::InvalidCredentials);
            }
            Err(e) => {
                error!(error = %e, "find_by_email failed");
                return Err(AuthenticationError::Persistence(e));
            }
        };

        if !user.is_active {
            warn!(user_id = %user.id, "login on deactivated account");
            return Err(AuthenticationError::AccountDeactivated);
        }

        let ok = self
            .hasher
            .verify_blocking(input.password, user.password_hash.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "verify_password failed");
                AuthenticationError::Internal("failed to verify password".into())
            })?;

        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthenticationError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(AuthenticateOutput {
            user_id: user.id,
            email: user.email,
            name: user.name,
            api_key: user.api_key,
            is_active: user.is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{memory::InMemoryUserRepository, password::test_hasher};
    use async_trait::async_trait;

    fn setup() -> (Arc<InMemoryUserRepository>, RegisterUser, AuthenticateUser) {
        let repo = Arc::new(InMemoryUserRepository::new());
        let hasher = test_hasher();
        let register = RegisterUser::new(repo.clone(), hasher.clone());
        let authenticate = AuthenticateUser::new(repo.clone(), hasher);
        (repo, register, authenticate)
    }

    fn reg(email: &str, name: &str, password: &str) -> RegisterInput {
        RegisterInput {
            email: email.into(),
            name: name.into(),
            password: password.into(),
        }
    }

    fn login(email: &str, password: &str) -> AuthenticateInput {
        AuthenticateInput {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn register_then_login_scenario() {
        let (repo, register, authenticate) = setup();

        let out = register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("register");
        assert_eq!(out.email, "a@x.com");
        assert_eq!(out.name, "A");
        assert!(!out.api_key.is_empty());

        let stored = repo
            .find_by_email("a@x.com")
            .await
            .expect("lookup")
            .expect("stored");
        assert_eq!(stored.id, out.user_id);
        assert_ne!(stored.password_hash, "secret1");
        assert_ne!(stored.password_hash, out.api_key);
        assert!(stored.is_active);
        assert_eq!(stored.created_at, stored.updated_at);

        let auth = authenticate
            .execute(login("a@x.com", "secret1"))
            .await
            .expect("login");
        assert_eq!(auth.user_id, out.user_id);
        assert_eq!(auth.api_key, out.api_key);
        assert!(auth.is_active);

        let err = authenticate
            .execute(login("a@x.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidCredentials));
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let (_, register, _) = setup();
        register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("first");
        let err = register
            .execute(reg("a@x.com", "Other", "another1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateEmail));
    }

    #[tokio::test]
    async fn email_is_normalized() {
        let (_, register, authenticate) = setup();
        let out = register
            .execute(reg("  A@X.com ", " A ", "secret1"))
            .await
            .expect("register");
        assert_eq!(out.email, "a@x.com");
        assert_eq!(out.name, "A");

        let err = register
            .execute(reg("a@x.COM", "A", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateEmail));

        authenticate
            .execute(login("A@x.com", "secret1"))
            .await
            .expect("case-insensitive login");
    }

    #[tokio::test]
    async fn validation_failures_create_nothing() {
        let (repo, register, _) = setup();
        let cases = [
            reg("a@x.com", "A", "abc"),
            reg("   ", "A", "secret1"),
            reg("a@x.com", "  ", "secret1"),
            reg("ax.com", "A", "secret1"),
        ];
        for input in cases {
            let err = register.execute(input).await.unwrap_err();
            assert!(matches!(err, RegistrationError::Validation(_)), "{err}");
        }
        assert_eq!(repo.find_by_email("a@x.com").await.expect("lookup"), None);
        assert!(repo.list(0, 10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn short_password_message() {
        let (_, register, _) = setup();
        let err = register
            .execute(reg("a@x.com", "A", "abc"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "password must be at least 6 characters");
    }

    #[tokio::test]
    async fn password_length_counts_characters() {
        let (_, register, _) = setup();
        // 5 characters, 10 bytes
        let err = register
            .execute(reg("a@x.com", "A", "ééééé"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));
        register
            .execute(reg("a@x.com", "A", "éééééé"))
            .await
            .expect("six characters");
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (_, register, authenticate) = setup();
        register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("register");

        let unknown = authenticate
            .execute(login("nobody@x.com", "secret1"))
            .await
            .unwrap_err();
        let wrong = authenticate
            .execute(login("a@x.com", "secret2"))
            .await
            .unwrap_err();
        assert!(matches!(unknown, AuthenticationError::InvalidCredentials));
        assert!(matches!(wrong, AuthenticationError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn deactivated_account_is_refused_even_with_correct_password() {
        let (repo, register, authenticate) = setup();
        let out = register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("register");

        let mut user = repo
            .find_by_id(out.user_id)
            .await
            .expect("lookup")
            .expect("stored");
        user.deactivate();
        repo.update(&user).await.expect("update");

        let err = authenticate
            .execute(login("a@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::AccountDeactivated));

        user.activate();
        repo.update(&user).await.expect("reactivate");
        authenticate
            .execute(login("a@x.com", "secret1"))
            .await
            .expect("login after reactivation");
    }

    #[tokio::test]
    async fn authentication_does_not_mutate_user() {
        let (repo, register, authenticate) = setup();
        let out = register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("register");
        let before = repo.find_by_id(out.user_id).await.expect("lookup");
        authenticate
            .execute(login("a@x.com", "secret1"))
            .await
            .expect("login");
        let _ = authenticate.execute(login("a@x.com", "nope")).await;
        let after = repo.find_by_id(out.user_id).await.expect("lookup");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn email_change_keeps_addresses_unique_and_loginable() {
        let (repo, register, authenticate) = setup();
        register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("register a");
        let b = register
            .execute(reg("b@x.com", "B", "secret2"))
            .await
            .expect("register b");

        let mut user_b = repo
            .find_by_id(b.user_id)
            .await
            .expect("lookup")
            .expect("stored");
        user_b.update_email("A@X.com");
        let err = repo.update(&user_b).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict));

        user_b.update_email(" C@X.Com ");
        repo.update(&user_b).await.expect("update to free address");
        let auth = authenticate
            .execute(login("c@x.com", "secret2"))
            .await
            .expect("login with new email");
        assert_eq!(auth.user_id, b.user_id);
        assert_eq!(auth.email, "c@x.com");

        let a = authenticate
            .execute(login("A@X.com", "secret1"))
            .await
            .expect("a still resolves to a");
        assert_ne!(a.user_id, b.user_id);
    }

    /// Store whose pre-check always misses, as if another request inserted
    /// the same email between lookup and create.
    struct RacingStore {
        inner: InMemoryUserRepository,
    }

    #[async_trait]
    impl UserRepository for RacingStore {
        async fn create(&self, user: &User) -> Result<(), RepoError> {
            self.inner.create(user).await
        }
        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, RepoError> {
            Ok(None)
        }
        async fn find_by_api_key(&self, api_key: &str) -> Result<Option<User>, RepoError> {
            self.inner.find_by_api_key(api_key).await
        }
        async fn update(&self, user: &User) -> Result<(), RepoError> {
            self.inner.update(user).await
        }
        async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
            self.inner.delete(id).await
        }
        async fn list(&self, offset: i64, limit: i64) -> Result<Vec<User>, RepoError> {
            self.inner.list(offset, limit).await
        }
    }

    #[tokio::test]
    async fn lost_race_maps_to_duplicate_email() {
        let repo = Arc::new(RacingStore {
            inner: InMemoryUserRepository::new(),
        });
        let register = RegisterUser::new(repo.clone(), test_hasher());
        register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .expect("first");
        let err = register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateEmail));
        assert_eq!(repo.inner.list(0, 10).await.expect("list").len(), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl UserRepository for BrokenStore {
        async fn create(&self, _user: &User) -> Result<(), RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn find_by_id(&self, _id: Uuid) -> Result<Option<User>, RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn find_by_api_key(&self, _api_key: &str) -> Result<Option<User>, RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn update(&self, _user: &User) -> Result<(), RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn delete(&self, _id: Uuid) -> Result<(), RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn list(&self, _offset: i64, _limit: i64) -> Result<Vec<User>, RepoError> {
            Err(RepoError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn store_failures_surface_as_persistence_errors() {
        let repo: Arc<dyn UserRepository> = Arc::new(BrokenStore);
        let register = RegisterUser::new(repo.clone(), test_hasher());
        let authenticate = AuthenticateUser::new(repo, test_hasher());

        let err = register
            .execute(reg("a@x.com", "A", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Persistence(_)));

        let err = authenticate
            .execute(login("a@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::Persistence(_)));
    }

    #[tokio::test]
    async fn concurrent_registrations_admit_exactly_one() {
        let (repo, register, _) = setup();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let register = register.clone();
            handles.push(tokio::spawn(async move {
                register.execute(reg("race@x.com", "R", "secret1")).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.expect("join") {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, RegistrationError::DuplicateEmail), "{e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(repo.list(0, 10).await.expect("list").len(), 1);
    }
}
