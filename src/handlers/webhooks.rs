//! Inbound webhook endpoint for the payment provider.
//!
//! The raw body bytes must survive untouched to the signature check, so the
//! handler takes `Bytes` rather than a typed extractor and parses JSON only
//! after verification passes.

use crate::{
    error::AppError,
    models::provider::ProviderEvent,
    services::{reconciliation_service, stripe_service},
    state::AppState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;

/// Handle one provider event delivery.
///
/// # Flow
///
/// 1. Verify the `Stripe-Signature` header over the raw body (HMAC-SHA256,
///    5-minute timestamp tolerance); failures return 400 and are never
///    processed
/// 2. Parse the event envelope
/// 3. Reconcile; any database or provider error returns non-2xx so the
///    provider redelivers the event later
///
/// Redeliveries are safe: every reconciliation write is idempotent on the
/// provider's own identifiers.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    stripe_service::verify_signature(
        &state.config.stripe_webhook_secret,
        &body,
        signature,
        Utc::now().timestamp(),
    )?;

    let event: ProviderEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("undecodable event payload: {e}")))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "webhook event received");

    reconciliation_service::handle_event(&state.pool, &state.stripe, &event).await?;

    Ok(StatusCode::OK)
}
