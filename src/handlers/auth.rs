//! Account registration and login.
//!
//! Passwords are stored as salted SHA-256 digests; access tokens are random
//! 256-bit values handed to the client once and stored only as their SHA-256
//! hash. Re-logging in rotates the token, which invalidates the previous one.

use crate::{
    error::AppError,
    models::account::{Account, AccountResponse, LoginRequest, LoginResponse, RegisterRequest},
    state::AppState,
};
use axum::{Json, extract::State, http::StatusCode};
use sha2::{Digest, Sha256};

/// Register a new account.
///
/// # Request Body
///
/// ```json
/// {
///   "username": "anna",
///   "email": "anna@example.com",
///   "first_name": "Anna",
///   "last_name": "Nowak",
///   "password": "secret-password",
///   "password_confirm": "secret-password"
/// }
/// ```
///
/// # Responses
///
/// - `201 Created` with the account (no token; clients log in next)
/// - `400 Bad Request` on validation failure or a taken username/email
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    validate_registration(&payload)?;

    let salt = hex::encode(rand::random::<[u8; 16]>());
    let password_hash = hash_password(&salt, &payload.password);

    let account = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (username, email, first_name, last_name, password_hash, password_salt)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(payload.username.trim())
    .bind(payload.email.trim().to_lowercase())
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(&password_hash)
    .bind(&salt)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match unique_violation(&e) {
        true => AppError::InvalidRequest("username or email already taken".into()),
        false => AppError::Database(e),
    })?;

    tracing::info!(account_id = %account.id, username = %account.username, "account registered");
    Ok((StatusCode::CREATED, Json(account.into())))
}

/// Log in with username or email plus password.
///
/// On success the response carries a fresh access token. Only its hash is
/// persisted; losing the response means logging in again.
///
/// # Responses
///
/// - `200 OK` with `{ "access_token": ..., "account": { ... } }`
/// - `401 Unauthorized` on a wrong identifier or password
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT * FROM accounts
        WHERE (username = $1 OR email = $1) AND is_active = true
        "#,
    )
    .bind(payload.username_or_email.trim())
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let presented = hash_password(&account.password_salt, &payload.password);
    if presented != account.password_hash {
        tracing::warn!(username = %account.username, "failed login attempt");
        return Err(AppError::Unauthorized);
    }

    // 256-bit token, shown once; only its hash is stored.
    let access_token = hex::encode(rand::random::<[u8; 32]>());
    let token_hash = hex::encode(Sha256::digest(access_token.as_bytes()));

    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET access_token_hash = $2, last_login_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(account.id)
    .bind(&token_hash)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(account_id = %account.id, username = %account.username, "login succeeded");
    Ok(Json(LoginResponse {
        access_token,
        account: account.into(),
    }))
}

fn validate_registration(payload: &RegisterRequest) -> Result<(), AppError> {
    if payload.username.trim().is_empty() {
        return Err(AppError::InvalidRequest("username must not be empty".into()));
    }
    if !payload.email.contains('@') {
        return Err(AppError::InvalidRequest("email address is not valid".into()));
    }
    if payload.password.len() < 8 {
        return Err(AppError::InvalidRequest(
            "password must be at least 8 characters".into(),
        ));
    }
    if payload.password != payload.password_confirm {
        return Err(AppError::InvalidRequest("passwords do not match".into()));
    }
    Ok(())
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        RegisterRequest {
            username: "anna".into(),
            email: "anna@example.com".into(),
            first_name: "Anna".into(),
            last_name: "Nowak".into(),
            password: "long-enough-password".into(),
            password_confirm: "long-enough-password".into(),
        }
    }

    #[test]
    fn valid_registration_passes() {
        assert!(validate_registration(&request()).is_ok());
    }

    #[test]
    fn mismatched_passwords_are_rejected() {
        let mut payload = request();
        payload.password_confirm = "something-else".into();
        assert!(validate_registration(&payload).is_err());
    }

    #[test]
    fn short_password_is_rejected() {
        let mut payload = request();
        payload.password = "short".into();
        payload.password_confirm = "short".into();
        assert!(validate_registration(&payload).is_err());
    }

    #[test]
    fn password_hash_depends_on_salt() {
        let a = hash_password("salt-one", "password");
        let b = hash_password("salt-two", "password");
        assert_ne!(a, b);
        assert_eq!(a, hash_password("salt-one", "password"));
    }
}
