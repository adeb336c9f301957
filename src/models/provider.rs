//! Payment provider object shapes.
//!
//! Only the fields this system persists or reacts to are modeled; everything
//! else in the provider's payloads is ignored by serde. Provider timestamps
//! are unix seconds and metadata values are always strings (a provider
//! convention), so `account_id` arrives as a string and is parsed here.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::billing::PurchaseKind;

/// Envelope of an inbound webhook event.
///
/// # Handled Types
///
/// - `checkout.session.completed`
/// - `invoice.payment_succeeded`
/// - `customer.subscription.deleted`
///
/// Everything else is acknowledged and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ProviderEventData,
}

impl ProviderEvent {
    /// Deserialize the event's payload object into the shape its
    /// `event_type` implies.
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            AppError::InvalidRequest(format!(
                "event {} has an unexpected payload shape: {e}",
                self.id
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEventData {
    /// The event's payload object; its shape depends on `event_type`
    pub object: serde_json::Value,
}

/// A checkout session, as embedded in `checkout.session.completed` events
/// and returned by session retrieval.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Present once the charge went through (payment mode)
    pub payment_intent: Option<String>,
    pub customer: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    /// Hosted checkout page the buyer gets redirected to
    pub url: Option<String>,
    /// "paid" once settled
    pub payment_status: Option<String>,
    /// Provider subscription id, present in subscription mode
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

/// Metadata this system attaches at checkout creation and reads back from
/// events. Provider metadata values are strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutMetadata {
    pub account_id: Option<String>,
    pub purchase: Option<String>,
}

impl CheckoutSession {
    /// Parse the local account id out of the metadata.
    pub fn account_id(&self) -> Result<Uuid, AppError> {
        let raw = self
            .metadata
            .account_id
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("Checkout metadata missing account_id".into()))?;
        Uuid::parse_str(raw)
            .map_err(|_| AppError::InvalidRequest("Checkout metadata account_id is not a UUID".into()))
    }

    /// Parse the purchase kind out of the metadata.
    pub fn purchase_kind(&self) -> Result<PurchaseKind, AppError> {
        let raw = self
            .metadata
            .purchase
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("Checkout metadata missing purchase".into()))?;
        PurchaseKind::parse(raw)
            .ok_or_else(|| AppError::InvalidRequest(format!("Unknown purchase kind: {raw}")))
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

/// The provider's authoritative subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    /// Unix seconds
    pub current_period_start: i64,
    /// Unix seconds
    pub current_period_end: i64,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: SubscriptionPrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPrice {
    pub unit_amount: Option<i64>,
    pub currency: String,
}

impl ProviderSubscription {
    pub fn period_start(&self) -> Result<DateTime<Utc>, AppError> {
        parse_unix(self.current_period_start, "current_period_start")
    }

    pub fn period_end(&self) -> Result<DateTime<Utc>, AppError> {
        parse_unix(self.current_period_end, "current_period_end")
    }

    /// Plan amount in cents, taken from the first subscription item.
    pub fn amount_cents(&self) -> Option<i64> {
        self.items.data.first().and_then(|item| item.price.unit_amount)
    }

    /// Plan currency, upper-cased to match local storage convention.
    pub fn currency(&self) -> Option<String> {
        self.items
            .data
            .first()
            .map(|item| item.price.currency.to_uppercase())
    }
}

/// A recurring invoice, as embedded in `invoice.payment_succeeded` events.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoice {
    pub id: String,
    /// Provider subscription id this invoice belongs to
    pub subscription: Option<String>,
}

/// A deleted (canceled) subscription, as embedded in
/// `customer.subscription.deleted` events. Only the id matters locally.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedSubscription {
    pub id: String,
}

fn parse_unix(seconds: i64, field: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| AppError::InvalidRequest(format!("Invalid {field} timestamp: {seconds}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_completed_event_parses() {
        let raw = serde_json::json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "payment_intent": "pi_test_1",
                    "customer": "cus_test_1",
                    "amount_total": 1900,
                    "currency": "pln",
                    "payment_status": "paid",
                    "metadata": {
                        "account_id": "550e8400-e29b-41d4-a716-446655440000",
                        "purchase": "single_optimization"
                    }
                }
            }
        });
        let event: ProviderEvent = serde_json::from_value(raw).expect("event parses");
        assert_eq!(event.event_type, "checkout.session.completed");

        let session: CheckoutSession =
            serde_json::from_value(event.data.object).expect("session parses");
        assert!(session.is_paid());
        assert_eq!(
            session.account_id().unwrap().to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(
            session.purchase_kind().unwrap(),
            crate::models::billing::PurchaseKind::SingleOptimization
        );
    }

    #[test]
    fn missing_metadata_is_an_error_not_a_panic() {
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_test_2"
        }))
        .expect("minimal session parses");
        assert!(session.account_id().is_err());
        assert!(session.purchase_kind().is_err());
        assert!(!session.is_paid());
    }

    #[test]
    fn provider_subscription_converts_unix_bounds() {
        let sub: ProviderSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "current_period_start": 1_755_000_000,
            "current_period_end": 1_757_592_000,
            "cancel_at_period_end": false,
            "items": {"data": [{"price": {"unit_amount": 4900, "currency": "pln"}}]}
        }))
        .expect("subscription parses");

        assert!(sub.period_start().unwrap() < sub.period_end().unwrap());
        assert_eq!(sub.amount_cents(), Some(4900));
        assert_eq!(sub.currency().as_deref(), Some("PLN"));
    }

    #[test]
    fn subscription_without_items_still_parses() {
        let sub: ProviderSubscription = serde_json::from_value(serde_json::json!({
            "id": "sub_2",
            "customer": "cus_2",
            "status": "active",
            "current_period_start": 1_755_000_000,
            "current_period_end": 1_757_592_000
        }))
        .expect("subscription parses");
        assert_eq!(sub.amount_cents(), None);
        assert_eq!(sub.currency(), None);
    }
}
