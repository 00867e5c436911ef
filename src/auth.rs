//! HTTP Basic authentication against the accounts table.
//!
//! The middleware resolves the caller's [`User`] and injects it into the
//! request extensions; handlers take it with `Extension<User>`.

use std::sync::{Arc, OnceLock};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::{User, ACCOUNTS_SCHEMA, USERS_TABLE};
use crate::store::{Filter, Store};

/// Hashes `password` into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::InternalError(format!("Failed to build salt: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalError(format!("Failed to hash password: {}", e)))
}

/// True when `password` matches the stored PHC string. Unparseable hashes
/// never match.
pub fn password_matches(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Hash checked on lookup misses so unknown accounts cost as much as known ones.
fn placeholder_hash() -> Option<&'static str> {
    static PLACEHOLDER: OnceLock<Option<String>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| hash_password("placeholder-password").ok())
        .as_deref()
}

/// Runs a full Argon2 verification that can never succeed.
pub fn burn_password_check(password: &str) {
    if let Some(hash) = placeholder_hash() {
        let _ = password_matches(password, hash);
    }
}

/// Looks the user up by `username` and checks the password.
pub async fn verify_credentials(
    store: &dyn Store,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    let filter = Filter::new().eq("username", username);
    let Some(record) = store
        .get(ACCOUNTS_SCHEMA, USERS_TABLE, &filter)
        .await?
        .into_iter()
        .next()
    else {
        burn_password_check(password);
        return Ok(None);
    };

    let user = User::from_record(record)?;
    if password_matches(password, &user.password_hash) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Decodes `Authorization: Basic <base64(user:password)>`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Rejects requests without valid Basic credentials.
pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (username, password) = basic_credentials(req.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing Basic credentials".to_string()))?;

    let user = verify_credentials(state.store.as_ref(), &username, &password)
        .await?
        .ok_or_else(|| {
            tracing::warn!("Rejected credentials for {}", username);
            AppError::Unauthorized("Invalid username or password".to_string())
        })?;

    tracing::debug!("Authenticated {}", user.username);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
