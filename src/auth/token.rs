use jsonwebtoken::{decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AuthError, TokenPayload, TokenService};

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Signed token body: the payload plus issue and expiry times (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub id: String,
    pub iat: u64,
    pub exp: u64,
}

/// RS256 JWTs signed with a private key and checked with the matching
/// public key.
pub struct RsaJwtTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

/// Keys often arrive through env vars with newlines escaped as `\n`.
fn unescape_pem(pem: &str) -> String {
    pem.replace("\\n", "\n")
}

impl RsaJwtTokens {
    pub fn from_pem(private_pem: &str, public_pem: &str, ttl_secs: u64) -> Result<Self, AuthError> {
        let encoding = EncodingKey::from_rsa_pem(unescape_pem(private_pem).as_bytes())
            .map_err(|e| AuthError::Config(format!("JWT private key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(unescape_pem(public_pem).as_bytes())
            .map_err(|e| AuthError::Config(format!("JWT public key: {e}")))?;
        Ok(Self {
            encoding,
            decoding,
            ttl_secs,
        })
    }

    /// Build from optional key material; both keys must be present.
    pub fn from_config(
        private_pem: Option<&str>,
        public_pem: Option<&str>,
        ttl_secs: u64,
    ) -> Result<Self, AuthError> {
        match (private_pem, public_pem) {
            (Some(private), Some(public)) => Self::from_pem(private, public, ttl_secs),
            _ => Err(AuthError::Config("JWT keys are missing".into())),
        }
    }
}

impl TokenService for RsaJwtTokens {
    fn issue(&self, payload: &TokenPayload) -> Result<String, AuthError> {
        let iat = get_current_timestamp();
        let claims = Claims {
            username: payload.username.clone(),
            id: payload.id.to_string(),
            iat,
            exp: iat + self.ttl_secs,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Token(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Unauthorized(e.to_string()))
    }
}
