use std::path::PathBuf;
use std::sync::Arc;

use argon2::Params;
use slotbook::auth::{Argon2Credentials, AuthError, AuthService, RsaJwtTokens, TokenService};
use slotbook::engine::{ConflictMode, Engine};

const PRIVATE: &str = include_str!("fixtures/jwt_private.pem");
const PUBLIC: &str = include_str!("fixtures/jwt_public.pem");

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_auth_flow");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn service(engine: Arc<Engine>) -> (AuthService, Arc<RsaJwtTokens>) {
    let tokens = Arc::new(RsaJwtTokens::from_pem(PRIVATE, PUBLIC, 3600).unwrap());
    let credentials = Argon2Credentials::with_params(Params::new(1024, 1, 1, None).unwrap());
    (
        AuthService::new(engine, Arc::new(credentials), tokens.clone()),
        tokens,
    )
}

#[tokio::test]
async fn register_login_and_authenticate_with_real_keys() {
    let engine = Arc::new(Engine::new(test_wal_path("real_keys.wal"), ConflictMode::default()).unwrap());
    let (auth, tokens) = service(engine.clone());

    let user = auth.register("alice", "correct horse").await.unwrap();
    let stored = engine.find_user("alice").unwrap();
    assert!(stored.password_hash.starts_with("$argon2id$"));
    assert_ne!(stored.password_hash, "correct horse");

    let token = auth.login("alice", "correct horse").await.unwrap();
    let claims = tokens.verify(&token.access_token).unwrap();
    assert_eq!(claims.username, "alice");
    assert_eq!(claims.id, user.id.to_string());
    assert_eq!(claims.exp - claims.iat, 3600);

    assert_eq!(auth.authenticate(&token.access_token).unwrap(), user);
    assert!(matches!(
        auth.login("alice", "wrong horse").await,
        Err(AuthError::InvalidCredentials)
    ));

    let json = serde_json::to_value(&token).unwrap();
    assert!(json["access_token"].is_string());
}

#[tokio::test]
async fn accounts_survive_restart() {
    let path = test_wal_path("accounts_restart.wal");
    {
        let engine = Arc::new(Engine::new(path.clone(), ConflictMode::default()).unwrap());
        let (auth, _) = service(engine);
        auth.register("bob", "pw").await.unwrap();
    }

    let engine = Arc::new(Engine::new(path, ConflictMode::default()).unwrap());
    let (auth, _) = service(engine);
    assert!(auth.validate_user("bob", "pw").await.unwrap().is_some());
    assert!(matches!(auth.register("bob", "again").await, Err(AuthError::UsernameTaken(_))));
}

#[tokio::test]
async fn token_from_another_store_is_rejected() {
    let first = Arc::new(Engine::new(test_wal_path("store_a.wal"), ConflictMode::default()).unwrap());
    let second = Arc::new(Engine::new(test_wal_path("store_b.wal"), ConflictMode::default()).unwrap());
    let (auth_a, _) = service(first);
    let (auth_b, _) = service(second);

    auth_a.register("carol", "pw").await.unwrap();
    let token = auth_a.login("carol", "pw").await.unwrap();
    assert!(matches!(
        auth_b.authenticate(&token.access_token),
        Err(AuthError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn booking_gate_rejects_missing_and_tampered_tokens() {
    let engine = Arc::new(Engine::new(test_wal_path("gate.wal"), ConflictMode::default()).unwrap());
    let (auth, _) = service(engine);
    let user = auth.register("dave", "pw").await.unwrap();
    let token = auth.login("dave", "pw").await.unwrap().access_token;
    assert_eq!(auth.authorize(Some(&token)).unwrap(), user);

    assert!(matches!(auth.authorize(None), Err(AuthError::Unauthorized(_))));

    let (head, signature) = token.rsplit_once('.').unwrap();
    let flipped = if signature.starts_with('A') { "B" } else { "A" };
    let tampered = format!("{head}.{flipped}{}", &signature[1..]);
    assert!(matches!(auth.authorize(Some(&tampered)), Err(AuthError::Unauthorized(_))));
}
