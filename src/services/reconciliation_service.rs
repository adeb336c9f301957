//! Turns verified payment-provider events into local billing state.
//!
//! Every mutation here is idempotent at the database level: payments insert
//! with `ON CONFLICT DO NOTHING` on the provider's payment-intent id, and
//! subscriptions upsert on the provider's subscription id. A redelivered
//! event hits the same conflict and produces no second grant or duplicate
//! row. When anything fails mid-way the enclosing transaction rolls back and
//! the handler returns non-2xx so the provider redelivers later.

use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::billing::PurchaseKind;
use crate::models::provider::{
    CheckoutSession, DeletedSubscription, ProviderEvent, ProviderInvoice, ProviderSubscription,
};
use crate::services::stripe_service::StripeClient;

/// Dispatch one verified event to its handler. Unrecognized event types are
/// acknowledged without side effects so the provider stops redelivering them.
pub async fn handle_event(
    pool: &DbPool,
    stripe: &StripeClient,
    event: &ProviderEvent,
) -> Result<(), AppError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSession = event.object()?;
            apply_checkout_completed(pool, stripe, &session).await
        }
        "invoice.payment_succeeded" => {
            let invoice: ProviderInvoice = event.object()?;
            apply_invoice_paid(pool, stripe, &invoice).await
        }
        "customer.subscription.deleted" => {
            let deleted: DeletedSubscription = event.object()?;
            apply_subscription_deleted(pool, &deleted).await
        }
        other => {
            tracing::debug!(event_id = %event.id, event_type = other, "ignoring event type");
            Ok(())
        }
    }
}

async fn apply_checkout_completed(
    pool: &DbPool,
    stripe: &StripeClient,
    session: &CheckoutSession,
) -> Result<(), AppError> {
    if !session.is_paid() {
        tracing::info!(session_id = %session.id, "checkout session completed but not paid, skipping");
        return Ok(());
    }

    let account_id = session.account_id()?;
    match session.purchase_kind()? {
        PurchaseKind::SingleOptimization => {
            apply_single_checkout(pool, session, account_id).await
        }
        PurchaseKind::MonthlyPackage => {
            let subscription_id = session.subscription.as_deref().ok_or_else(|| {
                AppError::InvalidRequest(format!(
                    "subscription checkout {} carries no subscription id",
                    session.id
                ))
            })?;
            let subscription = stripe.get_subscription(subscription_id).await?;
            apply_subscription_checkout(pool, session, &subscription, account_id).await
        }
    }
}

/// Record the one-off payment and mint its single-use grant, atomically.
///
/// The payment insert is the idempotency gate: a conflict on the payment
/// intent id means this event was already applied, so no grant is minted.
async fn apply_single_checkout(
    pool: &DbPool,
    session: &CheckoutSession,
    account_id: Uuid,
) -> Result<(), AppError> {
    let payment_intent = session.payment_intent.as_deref().ok_or_else(|| {
        AppError::InvalidRequest(format!("paid session {} carries no payment intent", session.id))
    })?;

    let mut tx = pool.begin().await?;

    let payment_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO payments
            (account_id, provider_payment_intent_id, provider_session_id,
             amount_cents, currency, kind, status, completed_at)
        VALUES ($1, $2, $3, $4, $5, 'single_optimization', 'completed', NOW())
        ON CONFLICT (provider_payment_intent_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(account_id)
    .bind(payment_intent)
    .bind(&session.id)
    .bind(session.amount_total.unwrap_or(0))
    .bind(session.currency.as_deref().unwrap_or("pln").to_uppercase())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(payment_id) = payment_id else {
        tracing::info!(
            payment_intent,
            session_id = %session.id,
            "duplicate single-payment event, already reconciled"
        );
        tx.rollback().await?;
        return Ok(());
    };

    sqlx::query(
        r#"
        INSERT INTO single_use_grants (account_id, payment_id, consumed, quota_limit)
        VALUES ($1, $2, 0, 1)
        "#,
    )
    .bind(account_id)
    .bind(payment_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(%account_id, payment_intent, "single optimization purchased, grant minted");
    Ok(())
}

/// Record the first subscription payment and upsert the subscription row.
async fn apply_subscription_checkout(
    pool: &DbPool,
    session: &CheckoutSession,
    subscription: &ProviderSubscription,
    account_id: Uuid,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    // Subscription checkouts have no payment intent on the session; the
    // subscription id stands in as the dedup key for the initial charge.
    let dedup_key = format!("sub_initial:{}", subscription.id);
    sqlx::query(
        r#"
        INSERT INTO payments
            (account_id, provider_payment_intent_id, provider_session_id,
             amount_cents, currency, kind, status, completed_at)
        VALUES ($1, $2, $3, $4, $5, 'monthly_package', 'completed', NOW())
        ON CONFLICT (provider_payment_intent_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(&dedup_key)
    .bind(&session.id)
    .bind(session.amount_total.or(subscription.amount_cents()).unwrap_or(0))
    .bind(subscription.currency().unwrap_or_else(|| "PLN".to_string()))
    .execute(&mut *tx)
    .await?;

    upsert_subscription(&mut tx, subscription, Some(account_id)).await?;

    tx.commit().await?;
    tracing::info!(
        %account_id,
        provider_subscription_id = %subscription.id,
        period_end = %subscription.period_end()?,
        "subscription activated"
    );
    Ok(())
}

/// A renewal invoice was paid: re-fetch the subscription from the provider
/// and roll the local period bounds forward. The invoice payload itself does
/// not carry the new bounds.
async fn apply_invoice_paid(
    pool: &DbPool,
    stripe: &StripeClient,
    invoice: &ProviderInvoice,
) -> Result<(), AppError> {
    let Some(subscription_id) = invoice.subscription.as_deref() else {
        tracing::debug!(invoice_id = %invoice.id, "invoice without subscription, ignoring");
        return Ok(());
    };

    let known: Option<Uuid> = sqlx::query_scalar(
        "SELECT account_id FROM subscriptions WHERE provider_subscription_id = $1",
    )
    .bind(subscription_id)
    .fetch_optional(pool)
    .await?;

    let Some(account_id) = known else {
        // Renewal for a subscription we never saw the checkout for. Nothing
        // to attribute it to; acknowledge and move on.
        tracing::warn!(
            invoice_id = %invoice.id,
            subscription_id,
            "invoice for unknown subscription, ignoring"
        );
        return Ok(());
    };

    let subscription = stripe.get_subscription(subscription_id).await?;

    let mut tx = pool.begin().await?;
    upsert_subscription(&mut tx, &subscription, None).await?;
    tx.commit().await?;

    tracing::info!(
        %account_id,
        subscription_id,
        period_end = %subscription.period_end()?,
        "subscription renewed"
    );
    Ok(())
}

/// The provider canceled the subscription. Mark it locally; entitlement
/// checks treat anything non-"active" as out of force.
async fn apply_subscription_deleted(
    pool: &DbPool,
    deleted: &DeletedSubscription,
) -> Result<(), AppError> {
    // Guarded so a redelivered cancellation is a true no-op: re-touching
    // updated_at on an already-canceled row would let stale rows shadow a
    // newer subscription in recency-based reads.
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'canceled', updated_at = NOW()
        WHERE provider_subscription_id = $1 AND status <> 'canceled'
        "#,
    )
    .bind(&deleted.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        tracing::info!(
            subscription_id = %deleted.id,
            "cancellation for an unknown or already-canceled subscription, ignoring"
        );
    } else {
        tracing::info!(subscription_id = %deleted.id, "subscription canceled");
    }
    Ok(())
}

/// Insert or refresh one subscription row keyed on the provider's id.
///
/// `account_id` is required on first sight (checkout); refreshes pass `None`
/// and leave the existing attribution untouched.
async fn upsert_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscription: &ProviderSubscription,
    account_id: Option<Uuid>,
) -> Result<(), AppError> {
    let period_start = subscription.period_start()?;
    let period_end = subscription.period_end()?;

    match account_id {
        Some(account_id) => {
            sqlx::query(
                r#"
                INSERT INTO subscriptions
                    (account_id, provider_subscription_id, provider_customer_id,
                     status, amount_cents, currency,
                     current_period_start, current_period_end, cancel_at_period_end)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (provider_subscription_id) DO UPDATE SET
                    status = EXCLUDED.status,
                    current_period_start = EXCLUDED.current_period_start,
                    current_period_end = EXCLUDED.current_period_end,
                    cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                    updated_at = NOW()
                "#,
            )
            .bind(account_id)
            .bind(&subscription.id)
            .bind(&subscription.customer)
            .bind(&subscription.status)
            .bind(subscription.amount_cents().unwrap_or(0))
            .bind(subscription.currency().unwrap_or_else(|| "PLN".to_string()))
            .bind(period_start)
            .bind(period_end)
            .bind(subscription.cancel_at_period_end)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                UPDATE subscriptions SET
                    status = $2,
                    current_period_start = $3,
                    current_period_end = $4,
                    cancel_at_period_end = $5,
                    updated_at = NOW()
                WHERE provider_subscription_id = $1
                "#,
            )
            .bind(&subscription.id)
            .bind(&subscription.status)
            .bind(period_start)
            .bind(period_end)
            .bind(subscription.cancel_at_period_end)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Apply an already-retrieved checkout session outside the webhook path.
///
/// The success-redirect handler uses this as a fallback for the case where
/// the browser lands on the success URL before the webhook arrives. Both
/// paths run the same idempotent reconciliation, so whichever comes second
/// is a no-op.
pub async fn reconcile_session(
    pool: &DbPool,
    stripe: &StripeClient,
    session: &CheckoutSession,
) -> Result<(), AppError> {
    apply_checkout_completed(pool, stripe, session).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, object: serde_json::Value) -> ProviderEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_test_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn checkout_event_parses_into_session() {
        let event = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_test_1",
                "payment_intent": "pi_test_1",
                "customer": "cus_test_1",
                "amount_total": 1900,
                "currency": "pln",
                "payment_status": "paid",
                "metadata": {
                    "account_id": "3e1b3f18-8c7a-41a3-9d55-0f6f0e9df0aa",
                    "purchase": "single_optimization"
                }
            }),
        );

        let session: CheckoutSession = event.object().unwrap();
        assert!(session.is_paid());
        assert_eq!(
            session.purchase_kind().unwrap(),
            PurchaseKind::SingleOptimization
        );
        assert_eq!(
            session.account_id().unwrap().to_string(),
            "3e1b3f18-8c7a-41a3-9d55-0f6f0e9df0aa"
        );
    }

    #[test]
    fn session_without_metadata_fails_attribution() {
        let event = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_test_2",
                "payment_status": "paid",
                "metadata": {}
            }),
        );

        let session: CheckoutSession = event.object().unwrap();
        assert!(session.account_id().is_err());
        assert!(session.purchase_kind().is_err());
    }

    #[test]
    fn deleted_subscription_event_parses() {
        let event = event(
            "customer.subscription.deleted",
            serde_json::json!({ "id": "sub_gone", "status": "canceled" }),
        );
        let deleted: DeletedSubscription = event.object().unwrap();
        assert_eq!(deleted.id, "sub_gone");
    }

    #[test]
    fn invoice_without_subscription_is_recognized() {
        let event = event(
            "invoice.payment_succeeded",
            serde_json::json!({ "id": "in_1" }),
        );
        let invoice: ProviderInvoice = event.object().unwrap();
        assert!(invoice.subscription.is_none());
    }
}
