use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params};
use async_trait::async_trait;

use super::{AuthError, CredentialService};

/// Argon2id password hashing. Hashing runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct Argon2Credentials {
    params: Option<Params>,
}

impl Argon2Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cost parameters, e.g. cheaper ones for tests.
    pub fn with_params(params: Params) -> Self {
        Self {
            params: Some(params),
        }
    }

    fn hasher(&self) -> Argon2<'static> {
        match &self.params {
            Some(p) => Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, p.clone()),
            None => Argon2::default(),
        }
    }
}

#[async_trait]
impl CredentialService for Argon2Credentials {
    async fn hash(&self, plain: &str) -> Result<String, AuthError> {
        let hasher = self.hasher();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .hash_password(plain.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::Hash(e.to_string()))
        })
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))?
    }

    async fn verify(&self, plain: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher();
        let plain = plain.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || {
            // Parameters come from the stored hash; the hasher only supplies the algorithm set.
            let parsed = PasswordHash::new(&hash).map_err(|e| AuthError::Hash(e.to_string()))?;
            Ok(hasher.verify_password(plain.as_bytes(), &parsed).is_ok())
        })
        .await
        .map_err(|e| AuthError::Hash(e.to_string()))?
    }
}
