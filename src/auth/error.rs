use crate::engine::EngineError;
use crate::validate::Violation;

#[derive(Debug)]
pub enum AuthError {
    Validation(Vec<Violation>),
    UsernameTaken(String),
    /// Unknown user or wrong password. The two are not distinguished.
    InvalidCredentials,
    /// Token rejected, or its subject no longer exists.
    Unauthorized(String),
    Hash(String),
    Token(String),
    Config(String),
    Store(EngineError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Validation(violations) => {
                let msgs: Vec<String> = violations.iter().map(ToString::to_string).collect();
                write!(f, "validation failed: {}", msgs.join("; "))
            }
            AuthError::UsernameTaken(name) => write!(f, "username already taken: {name}"),
            AuthError::InvalidCredentials => write!(f, "invalid username or password"),
            AuthError::Unauthorized(why) => write!(f, "unauthorized: {why}"),
            AuthError::Hash(e) => write!(f, "password hashing failed: {e}"),
            AuthError::Token(e) => write!(f, "token error: {e}"),
            AuthError::Config(e) => write!(f, "auth configuration error: {e}"),
            AuthError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for AuthError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::AlreadyExists(what) => {
                AuthError::UsernameTaken(what.trim_start_matches("user ").to_string())
            }
            other => AuthError::Store(other),
        }
    }
}
