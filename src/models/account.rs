//! Account data models and auth request/response types.
//!
//! Accounts authenticate with a username/email + password at login, which
//! issues a bearer access token. Only SHA-256 hashes of the password
//! (salted) and the token are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents an account record from the database.
///
/// # Database Table
///
/// Maps to the `accounts` table. Accounts are never hard-deleted;
/// `is_active` is the only removal path.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    /// Unique identifier for this account
    pub id: Uuid,

    pub username: String,

    pub email: String,

    pub first_name: String,

    pub last_name: String,

    /// Hex-encoded SHA-256 of `salt || password`
    pub password_hash: String,

    /// Hex-encoded random salt generated at registration
    pub password_salt: String,

    /// SHA-256 hash of the current bearer token; NULL until first login
    pub access_token_hash: Option<String>,

    /// Payment provider customer id, created lazily on first checkout
    pub stripe_customer_id: Option<String>,

    /// Developer accounts pass every entitlement check
    pub is_developer: bool,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    pub last_login_at: Option<DateTime<Utc>>,
}

/// Request body for `POST /api/v1/auth/register`.
///
/// # Validation
///
/// - All fields required and non-empty
/// - `password` and `password_confirm` must match
/// - Password must be at least 8 characters
/// - Username and email must be unused
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub password_confirm: String,
}

/// Request body for `POST /api/v1/auth/login`.
///
/// `username_or_email` accepts either identifier.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Response for a successful login.
///
/// The access token is shown exactly once; only its hash is persisted.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub account: AccountResponse,
}

/// Public view of an account, returned by auth endpoints.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            created_at: account.created_at,
        }
    }
}
