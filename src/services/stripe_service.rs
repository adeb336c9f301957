//! Thin client for the payment provider's REST API plus webhook signature
//! verification.
//!
//! The provider speaks form-encoded requests and JSON responses. This client
//! covers exactly the four calls the service needs: customer creation, hosted
//! checkout session creation, session retrieval and subscription retrieval.
//! Anything the provider returns that we do not model is ignored by serde.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;
use crate::models::billing::{PricingEntry, PurchaseKind};
use crate::models::provider::{CheckoutSession, ProviderSubscription};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Accepted clock skew between the signature timestamp and our clock.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Client for the payment provider. Clone-cheap; shared through AppState.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, STRIPE_API_BASE.to_string())
    }

    /// Point the client at a non-default host. Used by tests to target a
    /// mock server.
    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            base_url,
        }
    }

    /// Create a provider-side customer for the account and return its id.
    pub async fn create_customer(&self, email: &str, name: &str) -> Result<String, AppError> {
        #[derive(serde::Deserialize)]
        struct Customer {
            id: String,
        }

        let customer: Customer = self
            .post_form(
                "/v1/customers",
                &[("email", email), ("name", name)],
            )
            .await?;

        Ok(customer.id)
    }

    /// Create a hosted checkout session for one of the two purchases.
    ///
    /// The account id and purchase kind travel in the session metadata so the
    /// webhook reconciler can attribute the payment without any server-side
    /// session state.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        account_id: uuid::Uuid,
        pricing: &PricingEntry,
        public_base_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let mode = match pricing.kind {
            PurchaseKind::SingleOptimization => "payment",
            PurchaseKind::MonthlyPackage => "subscription",
        };
        let success_url = format!(
            "{public_base_url}/api/v1/billing/checkout/complete?session_id={{CHECKOUT_SESSION_ID}}"
        );
        // Cancel lands the browser back on the site root; API routes are
        // bearer-authenticated and unusable as redirect targets.
        let cancel_url = format!("{public_base_url}/");
        let amount = pricing.amount_cents.to_string();
        let account = account_id.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", mode),
            ("customer", customer_id),
            ("success_url", &success_url),
            ("cancel_url", &cancel_url),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", pricing.currency),
            ("line_items[0][price_data][unit_amount]", &amount),
            ("line_items[0][price_data][product_data][name]", pricing.name),
            ("metadata[account_id]", &account),
            ("metadata[purchase]", pricing.kind.as_str()),
        ];
        if matches!(pricing.kind, PurchaseKind::MonthlyPackage) {
            form.push(("line_items[0][price_data][recurring][interval]", "month"));
        }

        self.post_form("/v1/checkout/sessions", &form).await
    }

    /// Retrieve a checkout session by id.
    pub async fn get_checkout_session(&self, session_id: &str) -> Result<CheckoutSession, AppError> {
        self.get(&format!("/v1/checkout/sessions/{session_id}")).await
    }

    /// Retrieve a subscription by id. The reconciler uses this both when a
    /// subscription checkout completes and when a renewal invoice arrives,
    /// since invoice payloads do not carry the fresh period bounds.
    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, AppError> {
        self.get(&format!("/v1/subscriptions/{subscription_id}")).await
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request to {path} failed: {e}")))?;

        Self::decode(path, response).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request to {path} failed: {e}")))?;

        Self::decode(path, response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(path, %status, body, "payment provider request failed");
            return Err(AppError::Provider(format!(
                "{path} returned HTTP {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("undecodable response from {path}: {e}")))
    }
}

/// Verify a webhook payload against its `Stripe-Signature` header.
///
/// The header carries a unix timestamp `t` and one or more `v1` signatures;
/// each `v1` is HMAC-SHA256 over `"{t}.{payload}"` keyed with the endpoint
/// secret. Verification fails when no candidate matches or when `t` is more
/// than 5 minutes from `now`. Comparison is constant-time via `Mac::verify`.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for element in signature_header.split(',') {
        match element.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(sig) = hex::decode(value) {
                    candidates.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
    if candidates.is_empty() {
        return Err(AppError::InvalidSignature);
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::InvalidSignature);
    }

    for candidate in &candidates {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::InvalidSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let digest = mac.finalize().into_bytes();
        format!("t={timestamp},v1={}", hex::encode(digest))
    }

    #[test]
    fn valid_signature_verifies() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let header = sign(SECRET, 1_700_000_000, payload);
        assert!(verify_signature(SECRET, payload, &header, 1_700_000_000).is_ok());
    }

    #[test]
    fn skew_within_tolerance_verifies() {
        let payload = b"{}";
        let header = sign(SECRET, 1_700_000_000, payload);
        assert!(verify_signature(SECRET, payload, &header, 1_700_000_000 + 299).is_ok());
        assert!(verify_signature(SECRET, payload, &header, 1_700_000_000 - 299).is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = b"{}";
        let header = sign(SECRET, 1_700_000_000, payload);
        let result = verify_signature(SECRET, payload, &header, 1_700_000_000 + 301);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign(SECRET, 1_700_000_000, b"original");
        let result = verify_signature(SECRET, b"tampered", &header, 1_700_000_000);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"{}";
        let header = sign("whsec_other", 1_700_000_000, payload);
        let result = verify_signature(SECRET, payload, &header, 1_700_000_000);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for header in ["", "t=abc,v1=00", "v1=00", "t=1700000000", "t=1700000000,v1=zz"] {
            let result = verify_signature(SECRET, b"{}", header, 1_700_000_000);
            assert!(matches!(result, Err(AppError::InvalidSignature)), "header: {header}");
        }
    }

    #[test]
    fn any_matching_v1_candidate_verifies() {
        let payload = b"{}";
        let good = sign(SECRET, 1_700_000_000, payload);
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={good_sig}", "0".repeat(64));
        assert!(verify_signature(SECRET, payload, &header, 1_700_000_000).is_ok());
    }

    mod client {
        use super::super::StripeClient;
        use crate::error::AppError;
        use httpmock::prelude::*;

        #[tokio::test]
        async fn customer_creation_returns_provider_id() {
            let server = MockServer::start_async().await;
            let mock = server
                .mock_async(|when, then| {
                    when.method(POST)
                        .path("/v1/customers")
                        .body_contains("email=anna%40example.com");
                    then.status(200)
                        .json_body(serde_json::json!({"id": "cus_123", "object": "customer"}));
                })
                .await;

            let client =
                StripeClient::with_base_url("sk_test_key".into(), server.base_url());
            let id = client
                .create_customer("anna@example.com", "Anna Nowak")
                .await
                .unwrap();

            assert_eq!(id, "cus_123");
            mock.assert_async().await;
        }

        #[tokio::test]
        async fn provider_error_status_maps_to_provider_error() {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/v1/subscriptions/sub_404");
                    then.status(404)
                        .json_body(serde_json::json!({"error": {"message": "no such subscription"}}));
                })
                .await;

            let client =
                StripeClient::with_base_url("sk_test_key".into(), server.base_url());
            let result = client.get_subscription("sub_404").await;

            assert!(matches!(result, Err(AppError::Provider(_))));
        }

        #[tokio::test]
        async fn retrieved_session_carries_metadata() {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/v1/checkout/sessions/cs_1");
                    then.status(200).json_body(serde_json::json!({
                        "id": "cs_1",
                        "payment_status": "paid",
                        "payment_intent": "pi_1",
                        "amount_total": 1900,
                        "currency": "pln",
                        "metadata": {
                            "account_id": "3e1b3f18-8c7a-41a3-9d55-0f6f0e9df0aa",
                            "purchase": "single_optimization"
                        }
                    }));
                })
                .await;

            let client =
                StripeClient::with_base_url("sk_test_key".into(), server.base_url());
            let session = client.get_checkout_session("cs_1").await.unwrap();

            assert!(session.is_paid());
            assert_eq!(session.payment_intent.as_deref(), Some("pi_1"));
            assert!(session.account_id().is_ok());
        }
    }
}
