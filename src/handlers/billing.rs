//! Billing surface: payment status, pricing catalog, checkout creation and
//! the post-checkout landing endpoint.
//!
//! Purchases run entirely through the provider's hosted checkout. This
//! service only creates sessions and later reconciles their outcome, either
//! from the webhook or from the success redirect, whichever arrives first.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::billing::{
        Payment, PaymentStatus, PricingEntry, PurchaseKind, pricing_catalog, pricing_for,
    },
    services::{entitlement_service, reconciliation_service},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current payment status of the caller.
///
/// # Response (200 OK)
///
/// One of, tagged by `type`:
///
/// ```json
/// { "type": "developer" }
/// { "type": "subscription", "plan": "monthly_package", "expires": "..." }
/// { "type": "single_grant", "optimizations_left": 1 }
/// { "type": "free" }
/// ```
pub async fn status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<PaymentStatus>, AppError> {
    let status = entitlement_service::payment_status(&state.pool, &auth).await?;
    Ok(Json(status))
}

/// The pricing catalog.
pub async fn pricing() -> Json<Vec<PricingEntry>> {
    Json(pricing_catalog())
}

/// One payment in the account's billing history. Provider identifiers stay
/// internal; the caller sees what was bought, for how much, and when.
#[derive(Debug, Serialize)]
pub struct PaymentHistoryEntry {
    /// "single_optimization" or "monthly_package"
    pub kind: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentHistoryEntry {
    fn from(payment: Payment) -> Self {
        Self {
            kind: payment.kind,
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            status: payment.status,
            created_at: payment.created_at,
            completed_at: payment.completed_at,
        }
    }
}

/// The caller's payment history, newest first.
pub async fn payment_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<PaymentHistoryEntry>>, AppError> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE account_id = $1 ORDER BY created_at DESC",
    )
    .bind(auth.account_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// "single_optimization" or "monthly_package"
    pub purchase: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Hosted checkout page to redirect the buyer to
    pub checkout_url: String,
    pub provider_session_id: String,
}

/// Create a hosted checkout session for one of the two purchases.
///
/// # Flow
///
/// 1. Parse the purchase kind and price it from the catalog
/// 2. For the monthly package, refuse when a subscription is already in
///    force (no double billing)
/// 3. Ensure the account has a provider-side customer
/// 4. Create the session with the account id and purchase kind in its
///    metadata, so the webhook can attribute the payment statelessly
///
/// # Responses
///
/// - `200 OK` with the redirect URL
/// - `409 Conflict` when a subscription is already active
/// - `502 Bad Gateway` when the provider rejects the request
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let kind = PurchaseKind::parse(&payload.purchase).ok_or_else(|| {
        AppError::InvalidRequest(format!("unknown purchase kind: {}", payload.purchase))
    })?;
    let pricing = pricing_for(kind);

    if kind == PurchaseKind::MonthlyPackage
        && entitlement_service::in_force_subscription(&state.pool, auth.account_id, Utc::now())
            .await?
            .is_some()
    {
        return Err(AppError::SubscriptionExists);
    }

    let customer_id = ensure_customer(&state, &auth).await?;

    let session = state
        .stripe
        .create_checkout_session(
            &customer_id,
            auth.account_id,
            &pricing,
            &state.config.public_base_url,
        )
        .await?;

    let checkout_url = session.url.clone().ok_or_else(|| {
        AppError::Provider(format!("checkout session {} carries no URL", session.id))
    })?;

    tracing::info!(
        account_id = %auth.account_id,
        purchase = kind.as_str(),
        provider_session_id = %session.id,
        "checkout session created"
    );

    Ok(Json(CheckoutResponse {
        checkout_url,
        provider_session_id: session.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutCompleteQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutCompleteResponse {
    pub paid: bool,
    pub status: PaymentStatus,
}

/// Landing endpoint for the checkout success redirect.
///
/// Retrieves the session from the provider and, when paid, runs the same
/// idempotent reconciliation the webhook runs. Whichever of the two paths
/// arrives second is a no-op, so the buyer sees their purchase active
/// immediately regardless of webhook latency.
///
/// # Responses
///
/// - `200 OK` with `paid` and the refreshed payment status
/// - `404 Not Found` when the session belongs to a different account
pub async fn complete_checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<CheckoutCompleteQuery>,
) -> Result<Json<CheckoutCompleteResponse>, AppError> {
    let session = state.stripe.get_checkout_session(&query.session_id).await?;

    // A session id is capability-shaped; still never act on one that was
    // minted for a different account.
    if session.account_id()? != auth.account_id {
        return Err(AppError::CheckoutSessionNotFound);
    }

    let paid = session.is_paid();
    if paid {
        reconciliation_service::reconcile_session(&state.pool, &state.stripe, &session).await?;
    } else {
        tracing::info!(
            account_id = %auth.account_id,
            provider_session_id = %session.id,
            "checkout landing for an unpaid session"
        );
    }

    let status = entitlement_service::payment_status(&state.pool, &auth).await?;
    Ok(Json(CheckoutCompleteResponse { paid, status }))
}

/// Return the account's provider customer id, creating one on first use.
async fn ensure_customer(state: &AppState, auth: &AuthContext) -> Result<String, AppError> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT stripe_customer_id FROM accounts WHERE id = $1")
            .bind(auth.account_id)
            .fetch_optional(&state.pool)
            .await?;

    if let Some(Some(customer_id)) = existing {
        return Ok(customer_id);
    }

    let (email, name): (String, String) = sqlx::query_as(
        "SELECT email, first_name || ' ' || last_name FROM accounts WHERE id = $1",
    )
    .bind(auth.account_id)
    .fetch_one(&state.pool)
    .await?;

    let customer_id = state.stripe.create_customer(&email, &name).await?;

    sqlx::query("UPDATE accounts SET stripe_customer_id = $2 WHERE id = $1")
        .bind(auth.account_id)
        .bind(&customer_id)
        .execute(&state.pool)
        .await?;

    tracing::info!(account_id = %auth.account_id, customer_id, "provider customer created");
    Ok(customer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn history_entry_drops_provider_identifiers() {
        let payment = Payment {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            provider_payment_intent_id: "pi_secret".into(),
            provider_session_id: Some("cs_secret".into()),
            amount_cents: 1900,
            currency: "PLN".into(),
            kind: "single_optimization".into(),
            status: "completed".into(),
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };

        let entry = PaymentHistoryEntry::from(payment);
        assert_eq!(entry.kind, "single_optimization");
        assert_eq!(entry.amount_cents, 1900);

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("provider_payment_intent_id").is_none());
        assert!(json.get("provider_session_id").is_none());
    }
}
