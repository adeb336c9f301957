//! Account profile: identity, payment status and usage statistics.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        account::{Account, AccountResponse},
        billing::PaymentStatus,
        document::{Document, DocumentSummary},
    },
    services::entitlement_service,
    state::AppState,
};
use axum::{Extension, Json, extract::State};
use chrono::Utc;
use serde::Serialize;

/// Usage aggregates over the account's documents and artifacts.
#[derive(Debug, Serialize)]
pub struct AccountStats {
    pub total_documents: i64,
    pub optimized_documents: i64,
    pub analyzed_documents: i64,
    pub artifacts_generated: i64,
    /// Share of uploaded documents that were optimized, in whole percent
    pub optimization_rate_percent: i64,
    pub member_for_days: i64,
}

/// Response for `GET /api/v1/account/profile`.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub account: AccountResponse,
    pub payment_status: PaymentStatus,
    pub stats: AccountStats,
    /// Most recent uploads, newest first
    pub recent_documents: Vec<DocumentSummary>,
}

/// The caller's profile with usage statistics.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "account": { "username": "anna", ... },
///   "payment_status": { "type": "free" },
///   "stats": {
///     "total_documents": 4,
///     "optimized_documents": 2,
///     "analyzed_documents": 3,
///     "artifacts_generated": 1,
///     "optimization_rate_percent": 50,
///     "member_for_days": 12
///   },
///   "recent_documents": [ ... ]
/// }
/// ```
pub async fn profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ProfileResponse>, AppError> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(auth.account_id)
        .fetch_one(&state.pool)
        .await?;

    let (total, optimized, analyzed): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COUNT(*) FILTER (WHERE optimized_at IS NOT NULL),
               COUNT(*) FILTER (WHERE analyzed_at IS NOT NULL)
        FROM documents
        WHERE account_id = $1
        "#,
    )
    .bind(auth.account_id)
    .fetch_one(&state.pool)
    .await?;

    let artifacts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM generated_artifacts WHERE account_id = $1")
            .bind(auth.account_id)
            .fetch_one(&state.pool)
            .await?;

    let recent_documents = sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE account_id = $1 ORDER BY created_at DESC LIMIT 5",
    )
    .bind(auth.account_id)
    .fetch_all(&state.pool)
    .await?;

    let payment_status = entitlement_service::payment_status(&state.pool, &auth).await?;

    let stats = AccountStats {
        total_documents: total,
        optimized_documents: optimized,
        analyzed_documents: analyzed,
        artifacts_generated: artifacts,
        optimization_rate_percent: optimization_rate(total, optimized),
        member_for_days: (Utc::now() - account.created_at).num_days(),
    };

    Ok(Json(ProfileResponse {
        account: account.into(),
        payment_status,
        stats,
        recent_documents: recent_documents.into_iter().map(Into::into).collect(),
    }))
}

/// Whole-percent share of documents that were optimized. Zero uploads is
/// zero percent, not a division error.
fn optimization_rate(total: i64, optimized: i64) -> i64 {
    if total == 0 {
        0
    } else {
        optimized * 100 / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimization_rate_handles_empty_accounts() {
        assert_eq!(optimization_rate(0, 0), 0);
    }

    #[test]
    fn optimization_rate_is_whole_percent() {
        assert_eq!(optimization_rate(4, 2), 50);
        assert_eq!(optimization_rate(3, 1), 33);
        assert_eq!(optimization_rate(5, 5), 100);
        assert_eq!(optimization_rate(7, 0), 0);
    }
}
