//! Billing entities: payments, single-use grants, subscriptions, and the
//! entitlement vocabulary built on top of them.
//!
//! These rows are written only by the billing reconciler (provider events
//! and post-checkout redirects) and read by the entitlement engine. Payments
//! are immutable; subscriptions are mutated only by subsequent provider
//! events; grants are mutated only by quota consumption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A gated action the entitlement engine can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Résumé optimization: covered by a subscription or a single-use grant
    Optimize,
    /// Cover letter / interview questions / skills-gap: subscription only
    FullFeatures,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Optimize => write!(f, "résumé optimization"),
            Capability::FullFeatures => write!(f, "full package features"),
        }
    }
}

/// What covers a permitted action. Callers need this to know whether a
/// successful optimization must consume grant quota afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Developer,
    Subscription,
    Grant,
}

/// The two purchasable products, as carried in checkout metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    /// One résumé optimization, 19 PLN, no expiry
    SingleOptimization,
    /// Full monthly package, 49 PLN/month recurring
    MonthlyPackage,
}

impl PurchaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseKind::SingleOptimization => "single_optimization",
            PurchaseKind::MonthlyPackage => "monthly_package",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single_optimization" => Some(PurchaseKind::SingleOptimization),
            "monthly_package" => Some(PurchaseKind::MonthlyPackage),
            _ => None,
        }
    }
}

/// One entry of the pricing catalog shown on the pricing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PricingEntry {
    pub kind: PurchaseKind,
    pub amount_cents: i64,
    pub currency: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Current pricing. Amounts are in grosz (PLN cents), never floats.
pub fn pricing_catalog() -> Vec<PricingEntry> {
    vec![
        PricingEntry {
            kind: PurchaseKind::SingleOptimization,
            amount_cents: 1900,
            currency: "PLN",
            name: "Single résumé optimization",
            description: "Optimize one résumé, no additional features",
        },
        PricingEntry {
            kind: PurchaseKind::MonthlyPackage,
            amount_cents: 4900,
            currency: "PLN",
            name: "Full monthly package",
            description: "Résumé + cover letter + interview questions + skills-gap analysis",
        },
    ]
}

/// Look up one pricing entry by purchase kind.
pub fn pricing_for(kind: PurchaseKind) -> PricingEntry {
    pricing_catalog()
        .into_iter()
        .find(|entry| entry.kind == kind)
        .expect("catalog covers every purchase kind")
}

/// An immutable record of one charge from the payment provider.
///
/// # Database Table
///
/// Maps to the `payments` table. `provider_payment_intent_id` is unique,
/// which is what makes webhook redelivery idempotent: a duplicate event
/// conflicts on insert and is dropped without side effects.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider_payment_intent_id: String,
    pub provider_session_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    /// "single_optimization" or "monthly_package"
    pub kind: String,
    /// "pending", "completed", "failed", "refunded"
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One unit of purchased one-shot quota, derived from a completed payment.
///
/// # Database Table
///
/// Maps to the `single_use_grants` table. `consumed` only ever increases,
/// and never past `quota_limit` (CHECK constraint + atomic consumption
/// statement). Grants never expire under current policy; `expires_at`
/// stays NULL.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SingleUseGrant {
    pub id: Uuid,
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub consumed: i32,
    pub quota_limit: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SingleUseGrant {
    pub fn remaining(&self) -> i32 {
        (self.quota_limit - self.consumed).max(0)
    }
}

/// A recurring billing agreement mirrored from the payment provider.
///
/// # Database Table
///
/// Maps to the `subscriptions` table. Status transitions come exclusively
/// from provider events; a canceled row stays queryable forever.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    /// Provider-assigned: "active", "past_due", "canceled", ...
    pub status: String,
    pub plan_code: String,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A subscription is in force iff its status is active and the current
    /// billing period has not ended.
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.status == "active" && now < self.current_period_end
    }
}

/// Tagged entitlement status for an account. Exactly one tag applies;
/// developer dominates, then subscription, then grant, then free.
///
/// # JSON Examples
///
/// ```json
/// {"type": "subscription", "plan": "monthly_package", "expires": "2026-09-10T00:00:00Z"}
/// {"type": "single_grant", "optimizations_left": 1}
/// {"type": "free"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentStatus {
    Developer,
    Subscription {
        plan: String,
        expires: DateTime<Utc>,
    },
    SingleGrant {
        optimizations_left: i64,
    },
    Free,
}
