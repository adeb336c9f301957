//! Entitlement engine: decides whether an account may run a gated action,
//! and consumes one-shot quota when an optimization completes under a grant.
//!
//! All functions take the account explicitly; there is no ambient
//! "current user" context, which keeps the engine a pure function of
//! (account, billing records) and independently testable.
//!
//! # Precedence
//!
//! 1. Developer flag (always passes, nothing consumed)
//! 2. In-force subscription (covers everything, no grant is touched)
//! 3. Single-use grant with remaining quota (Optimize only)
//!
//! # Atomicity
//!
//! Quota consumption is a single conditional UPDATE, so two concurrent
//! optimize calls against one remaining unit yield exactly one success.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::billing::{Capability, Coverage, PaymentStatus, SingleUseGrant, Subscription},
    services::generation_service::Tier,
};

/// Check whether the account may run `capability` right now.
///
/// Returns what covers the action, or the matching denial:
/// - `EntitlementRequired` when nothing was ever purchased that could cover it
/// - `QuotaExhausted` when grants exist but every one is spent (Optimize only)
///
/// This check consumes nothing; callers run [`consume_grant`] after the
/// gated action actually succeeds, and only for `Coverage::Grant`.
pub async fn check(
    pool: &DbPool,
    auth: &AuthContext,
    capability: Capability,
) -> Result<Coverage, AppError> {
    if auth.is_developer {
        return Ok(Coverage::Developer);
    }

    if in_force_subscription(pool, auth.account_id, Utc::now())
        .await?
        .is_some()
    {
        return Ok(Coverage::Subscription);
    }

    match capability {
        Capability::FullFeatures => Err(AppError::EntitlementRequired(capability)),
        Capability::Optimize => {
            let remaining: Option<i64> = sqlx::query_scalar(
                "SELECT SUM(quota_limit - consumed) FROM single_use_grants WHERE account_id = $1",
            )
            .bind(auth.account_id)
            .fetch_one(pool)
            .await?;

            resolve_grant_coverage(remaining)
        }
    }
}

/// Denial semantics for the optimize capability when grants are the only
/// possible coverage. `remaining` is the summed leftover quota, `None` when
/// the account never purchased a grant.
///
/// The two denials are deliberately distinct: an exhausted quota must not
/// send a paying user back to the pricing page as if they never purchased.
pub fn resolve_grant_coverage(remaining: Option<i64>) -> Result<Coverage, AppError> {
    match remaining {
        Some(left) if left > 0 => Ok(Coverage::Grant),
        Some(_) => Err(AppError::QuotaExhausted),
        None => Err(AppError::EntitlementRequired(Capability::Optimize)),
    }
}

/// Consume exactly one unit of one-shot quota for this account.
///
/// The check and the decrement are one SQL statement: the oldest grant that
/// still has quota is locked, skipped if another transaction holds it, and
/// incremented. Returns false (touching nothing) when no quota remains,
/// so repeated calls can never push `consumed` past `quota_limit`.
pub async fn consume_grant(pool: &DbPool, account_id: Uuid) -> Result<bool, AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE single_use_grants
        SET consumed = consumed + 1
        WHERE id = (
            SELECT id FROM single_use_grants
            WHERE account_id = $1 AND consumed < quota_limit
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        "#,
    )
    .bind(account_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(updated == 1)
}

/// Pick the generation tier for this account: premium for developers and
/// in-force subscribers, free otherwise (grant holders generate on the
/// free tier).
pub async fn tier_for(pool: &DbPool, auth: &AuthContext) -> Result<Tier, AppError> {
    if auth.is_developer {
        return Ok(Tier::Premium);
    }
    let subscription = in_force_subscription(pool, auth.account_id, Utc::now()).await?;
    Ok(if subscription.is_some() {
        Tier::Premium
    } else {
        Tier::Free
    })
}

/// Tagged status describing the account's current tier, used by the UI and
/// the pricing page. Exactly one tag applies.
pub async fn payment_status(pool: &DbPool, auth: &AuthContext) -> Result<PaymentStatus, AppError> {
    let now = Utc::now();
    let subscriptions = account_subscriptions(pool, auth.account_id).await?;
    let grants = account_grants(pool, auth.account_id).await?;
    Ok(resolve_status(
        auth.is_developer,
        select_subscription(&subscriptions, now),
        &grants,
        now,
    ))
}

/// Pure status resolution over already-fetched records.
///
/// Kept free of SQL so the precedence rules are testable without Postgres.
pub fn resolve_status(
    is_developer: bool,
    subscription: Option<&Subscription>,
    grants: &[SingleUseGrant],
    now: DateTime<Utc>,
) -> PaymentStatus {
    if is_developer {
        return PaymentStatus::Developer;
    }

    if let Some(sub) = subscription {
        if sub.is_in_force(now) {
            return PaymentStatus::Subscription {
                plan: sub.plan_code.clone(),
                expires: sub.current_period_end,
            };
        }
    }

    let remaining: i64 = grants.iter().map(|g| g.remaining() as i64).sum();
    if remaining > 0 {
        return PaymentStatus::SingleGrant {
            optimizations_left: remaining,
        };
    }

    PaymentStatus::Free
}

/// The account's in-force subscription, if any.
pub async fn in_force_subscription(
    pool: &DbPool,
    account_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Subscription>, AppError> {
    let subscriptions = account_subscriptions(pool, account_id).await?;
    Ok(select_subscription(&subscriptions, now)
        .filter(|sub| sub.is_in_force(now))
        .cloned())
}

/// Pick the row that represents the account's subscription state: an
/// in-force row when one exists, otherwise the most recently updated one.
///
/// Recency alone is not a safe criterion. A redelivered cancellation event
/// can touch an old row's `updated_at` after a newer subscription was
/// bought, and the newer in-force row must still win.
pub fn select_subscription(
    subscriptions: &[Subscription],
    now: DateTime<Utc>,
) -> Option<&Subscription> {
    subscriptions
        .iter()
        .filter(|sub| sub.is_in_force(now))
        .max_by_key(|sub| sub.updated_at)
        .or_else(|| subscriptions.iter().max_by_key(|sub| sub.updated_at))
}

async fn account_subscriptions(
    pool: &DbPool,
    account_id: Uuid,
) -> Result<Vec<Subscription>, AppError> {
    let subscriptions = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;
    Ok(subscriptions)
}

async fn account_grants(
    pool: &DbPool,
    account_id: Uuid,
) -> Result<Vec<SingleUseGrant>, AppError> {
    let grants = sqlx::query_as::<_, SingleUseGrant>(
        "SELECT * FROM single_use_grants WHERE account_id = $1 ORDER BY created_at",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: &str, period_end: DateTime<Utc>) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            provider_subscription_id: "sub_test".into(),
            provider_customer_id: "cus_test".into(),
            status: status.into(),
            plan_code: "monthly_package".into(),
            amount_cents: 4900,
            currency: "PLN".into(),
            current_period_start: now - Duration::days(1),
            current_period_end: period_end,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn grant(consumed: i32, quota_limit: i32) -> SingleUseGrant {
        SingleUseGrant {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            consumed,
            quota_limit,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn developer_flag_dominates_everything() {
        let now = Utc::now();
        let sub = subscription("active", now + Duration::days(30));
        let grants = vec![grant(0, 1)];
        assert_eq!(
            resolve_status(true, Some(&sub), &grants, now),
            PaymentStatus::Developer
        );
    }

    #[test]
    fn in_force_subscription_wins_over_unconsumed_grant() {
        let now = Utc::now();
        let expires = now + Duration::days(30);
        let sub = subscription("active", expires);
        let grants = vec![grant(0, 1)];
        assert_eq!(
            resolve_status(false, Some(&sub), &grants, now),
            PaymentStatus::Subscription {
                plan: "monthly_package".into(),
                expires,
            }
        );
    }

    #[test]
    fn expired_subscription_falls_back_to_grant() {
        let now = Utc::now();
        let sub = subscription("active", now - Duration::seconds(1));
        let grants = vec![grant(0, 1)];
        assert_eq!(
            resolve_status(false, Some(&sub), &grants, now),
            PaymentStatus::SingleGrant {
                optimizations_left: 1
            }
        );
    }

    #[test]
    fn canceled_subscription_evaluates_as_absent() {
        let now = Utc::now();
        // Period end still in the future, but the status left "active".
        let sub = subscription("canceled", now + Duration::days(10));
        assert_eq!(
            resolve_status(false, Some(&sub), &[], now),
            PaymentStatus::Free
        );
    }

    #[test]
    fn exhausted_grants_report_free() {
        let now = Utc::now();
        let grants = vec![grant(1, 1), grant(2, 2)];
        assert_eq!(resolve_status(false, None, &grants, now), PaymentStatus::Free);
    }

    #[test]
    fn remaining_quota_sums_across_grants() {
        let now = Utc::now();
        let grants = vec![grant(1, 1), grant(0, 1), grant(0, 1)];
        assert_eq!(
            resolve_status(false, None, &grants, now),
            PaymentStatus::SingleGrant {
                optimizations_left: 2
            }
        );
    }

    #[test]
    fn subscription_in_force_boundary() {
        let now = Utc::now();
        let sub = subscription("active", now + Duration::days(1));
        assert!(sub.is_in_force(now));
        // Exactly at period end is no longer in force.
        assert!(!sub.is_in_force(sub.current_period_end));
        assert!(!sub.is_in_force(sub.current_period_end + Duration::seconds(1)));

        let past_due = subscription("past_due", now + Duration::days(1));
        assert!(!past_due.is_in_force(now));
    }

    #[test]
    fn redelivered_cancellation_does_not_eclipse_newer_subscription() {
        let now = Utc::now();
        // Subscription A was canceled, then the account bought B. A
        // redelivered cancellation event touched A's updated_at last, so A
        // is the most recent row; B must still be selected.
        let mut canceled_a = subscription("canceled", now + Duration::days(3));
        canceled_a.updated_at = now;
        let mut active_b = subscription("active", now + Duration::days(30));
        active_b.updated_at = now - Duration::days(1);

        let rows = vec![canceled_a, active_b.clone()];
        let selected = select_subscription(&rows, now).expect("a row is selected");
        assert_eq!(selected.id, active_b.id);
        assert!(selected.is_in_force(now));

        assert_eq!(
            resolve_status(false, select_subscription(&rows, now), &[], now),
            PaymentStatus::Subscription {
                plan: "monthly_package".into(),
                expires: active_b.current_period_end,
            }
        );
    }

    #[test]
    fn selection_without_in_force_rows_falls_back_to_most_recent() {
        let now = Utc::now();
        let mut old = subscription("canceled", now - Duration::days(60));
        old.updated_at = now - Duration::days(60);
        let mut recent = subscription("canceled", now - Duration::days(5));
        recent.updated_at = now - Duration::days(5);

        let rows = vec![old, recent.clone()];
        assert_eq!(select_subscription(&rows, now).unwrap().id, recent.id);
        assert_eq!(select_subscription(&[], now), None);
    }

    #[test]
    fn grant_coverage_distinguishes_exhausted_from_never_purchased() {
        // No grant rows at all: the account never purchased.
        assert!(matches!(
            resolve_grant_coverage(None),
            Err(AppError::EntitlementRequired(Capability::Optimize))
        ));
        // Grants exist with quota left.
        assert!(matches!(resolve_grant_coverage(Some(1)), Ok(Coverage::Grant)));
        assert!(matches!(resolve_grant_coverage(Some(3)), Ok(Coverage::Grant)));
        // Grants exist but every unit is spent: distinct denial.
        assert!(matches!(
            resolve_grant_coverage(Some(0)),
            Err(AppError::QuotaExhausted)
        ));
    }

    #[test]
    fn grant_lifecycle_walks_through_all_three_denial_states() {
        // Before any purchase.
        assert!(matches!(
            resolve_grant_coverage(None),
            Err(AppError::EntitlementRequired(_))
        ));
        // After buying one optimization.
        assert!(matches!(resolve_grant_coverage(Some(1)), Ok(Coverage::Grant)));
        // After spending it.
        assert!(matches!(
            resolve_grant_coverage(Some(0)),
            Err(AppError::QuotaExhausted)
        ));
    }

    #[test]
    fn grant_remaining_never_negative() {
        assert_eq!(grant(0, 1).remaining(), 1);
        assert_eq!(grant(1, 1).remaining(), 0);
        // Should be unreachable given the CHECK constraint, but the
        // accessor still clamps.
        assert_eq!(grant(3, 1).remaining(), 0);
    }
}
