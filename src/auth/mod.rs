//! Registration, login and token checks on top of the booking store.
//!
//! Password hashing and token signing sit behind [`CredentialService`] and
//! [`TokenService`] so their algorithms stay a deployment choice.

mod credentials;
mod error;
mod token;

pub use credentials::Argon2Credentials;
pub use error::AuthError;
pub use token::{Claims, RsaJwtTokens, DEFAULT_TOKEN_TTL_SECS};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::Engine;
use crate::limits::{MAX_PASSWORD_LEN, MAX_USERNAME_LEN};
use crate::model::UserInfo;
use crate::observability;
use crate::validate::Violation;

/// One-way password hashing.
#[async_trait]
pub trait CredentialService: Send + Sync {
    async fn hash(&self, plain: &str) -> Result<String, AuthError>;
    async fn verify(&self, plain: &str, hash: &str) -> Result<bool, AuthError>;
}

/// What a session token asserts about its bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub username: String,
    pub id: Ulid,
}

/// Signs and checks bearer tokens.
pub trait TokenService: Send + Sync {
    fn issue(&self, payload: &TokenPayload) -> Result<String, AuthError>;
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

pub struct AuthService {
    engine: Arc<Engine>,
    credentials: Arc<dyn CredentialService>,
    tokens: Arc<dyn TokenService>,
}

fn check_credentials_shape(username: &str, password: &str) -> Result<(), AuthError> {
    let mut violations = Vec::new();
    if username.trim().is_empty() {
        violations.push(Violation::new("username", "username should not be empty"));
    } else if username.len() > MAX_USERNAME_LEN {
        violations.push(Violation::new("username", "username is too long"));
    }
    if password.is_empty() {
        violations.push(Violation::new("password", "password should not be empty"));
    } else if password.len() > MAX_PASSWORD_LEN {
        violations.push(Violation::new("password", "password is too long"));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(AuthError::Validation(violations))
    }
}

fn auth_failure(reason: &'static str) {
    metrics::counter!(observability::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

impl AuthService {
    pub fn new(
        engine: Arc<Engine>,
        credentials: Arc<dyn CredentialService>,
        tokens: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            engine,
            credentials,
            tokens,
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<UserInfo, AuthError> {
        check_credentials_shape(username, password)?;
        if self.engine.find_user(username).is_some() {
            return Err(AuthError::UsernameTaken(username.to_string()));
        }
        let hash = self.credentials.hash(password).await?;
        let user = self.engine.register_user(username, hash).await?;
        Ok(user.info())
    }

    /// The account if `password` matches, `None` otherwise.
    pub async fn validate_user(&self, username: &str, password: &str) -> Result<Option<UserInfo>, AuthError> {
        if password.len() > MAX_PASSWORD_LEN {
            return Ok(None);
        }
        let Some(user) = self.engine.find_user(username) else {
            return Ok(None);
        };
        if self.credentials.verify(password, &user.password_hash).await? {
            Ok(Some(user.info()))
        } else {
            Ok(None)
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken, AuthError> {
        let Some(user) = self.validate_user(username, password).await? else {
            auth_failure("bad_credentials");
            warn!(username, "login rejected");
            return Err(AuthError::InvalidCredentials);
        };
        let access_token = self.tokens.issue(&TokenPayload {
            username: user.username.clone(),
            id: user.id,
        })?;
        info!(id = %user.id, username = %user.username, "token issued");
        Ok(AccessToken { access_token })
    }

    /// Resolve a bearer token to the account it was issued for. The account
    /// must still exist.
    pub fn authenticate(&self, token: &str) -> Result<UserInfo, AuthError> {
        let claims = self.tokens.verify(token).inspect_err(|_| auth_failure("bad_token"))?;
        match self.engine.find_user(&claims.username) {
            Some(user) if user.id.to_string() == claims.id => Ok(user.info()),
            _ => {
                auth_failure("unknown_subject");
                Err(AuthError::Unauthorized("User not found or unauthorized".into()))
            }
        }
    }

    /// Gate for booking operations: a bearer token must be present and valid.
    pub fn authorize(&self, token: Option<&str>) -> Result<UserInfo, AuthError> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => self.authenticate(token),
            None => {
                auth_failure("missing_token");
                Err(AuthError::Unauthorized("Missing bearer token".into()))
            }
        }
    }
}
