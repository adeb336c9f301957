//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::models::billing::Capability;

/// Application-wide error type.
///
/// This enum represents all possible errors that can occur in the application.
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Database errors**: any sqlx::Error from database operations
/// - **Authentication errors**: invalid credentials or bearer tokens
/// - **Validation errors**: invalid request data, oversized uploads
/// - **Extraction errors**: the uploaded PDF yields no usable text
/// - **Entitlement denials**: the account must purchase access first;
///   these carry a purchase-redirect signal and are never to be confused
///   with transient generation failures
/// - **Upstream failures**: the generation API or payment provider misbehaved
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credentials or bearer token are missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid credentials")]
    Unauthorized,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Uploaded file exceeds the configured size cap.
    ///
    /// Returns HTTP 413 Payload Too Large.
    #[error("File is too large")]
    PayloadTooLarge,

    /// Text extraction from the uploaded PDF failed (corrupt, encrypted,
    /// or no extractable text). No Document row is created in this case.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Could not extract text from the PDF file")]
    ExtractionFailed(String),

    /// Requested document does not exist or doesn't belong to the
    /// authenticated account.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Document not found")]
    DocumentNotFound,

    /// Requested generated artifact does not exist or doesn't belong to the
    /// authenticated account.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Artifact not found")]
    ArtifactNotFound,

    /// Referenced checkout session does not exist or doesn't belong to the
    /// authenticated account.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Checkout session not found")]
    CheckoutSessionNotFound,

    /// The account has never purchased access covering this capability.
    ///
    /// Returns HTTP 402 Payment Required with `redirect_to_pricing: true`
    /// so the caller can steer the user into the purchase flow.
    #[error("Purchase required for {0}")]
    EntitlementRequired(Capability),

    /// The account purchased one-shot optimizations but has used them all.
    /// Deliberately distinct from "never purchased".
    ///
    /// Returns HTTP 402 Payment Required.
    #[error("All purchased optimizations have been used")]
    QuotaExhausted,

    /// Checkout initiation was blocked because an in-force subscription
    /// already exists for the account.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("An active subscription already exists")]
    SubscriptionExists,

    /// The generation API failed after all retry attempts. The specific
    /// failure kind (timeout / connection / malformed response) is logged;
    /// callers always see this one uniform signal.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("Generation service is unavailable, try again later")]
    GenerationUnavailable,

    /// Webhook signature verification failed. The event is rejected outright
    /// with no processing.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The payment provider returned an error or an unusable response.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment provider error: {0}")]
    Provider(String),
}

/// Convert AppError into an HTTP response.
///
/// This implementation allows Axum handlers to return `Result<T, AppError>`
/// and have errors automatically converted to proper HTTP responses.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Entitlement denials additionally carry `"redirect_to_pricing": true`
/// inside the error object.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Entitlement denial gets an extra field, so it builds its own body.
        if let AppError::EntitlementRequired(capability) = &self {
            let message = match capability {
                Capability::Optimize => {
                    "To optimize your résumé, purchase a single optimization (19 PLN) \
                     or the full monthly package (49 PLN/month)."
                }
                Capability::FullFeatures => {
                    "This feature is available in the full monthly package (49 PLN/month)."
                }
            };
            let body = Json(json!({
                "error": {
                    "code": "entitlement_required",
                    "message": message,
                    "redirect_to_pricing": true
                }
            }));
            return (StatusCode::PAYMENT_REQUIRED, body).into_response();
        }

        // Map each remaining error variant to (HTTP status, error code, message)
        let (status, code, message) = match self {
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string())
            }
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                // The cap is configurable, so the message names no number.
                "File exceeds the upload size limit".to_string(),
            ),
            AppError::ExtractionFailed(ref detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "extraction_failed",
                format!("Could not extract text from the PDF file: {detail}"),
            ),
            AppError::DocumentNotFound => (
                StatusCode::NOT_FOUND,
                "document_not_found",
                self.to_string(),
            ),
            AppError::ArtifactNotFound => (
                StatusCode::NOT_FOUND,
                "artifact_not_found",
                self.to_string(),
            ),
            AppError::CheckoutSessionNotFound => (
                StatusCode::NOT_FOUND,
                "checkout_session_not_found",
                self.to_string(),
            ),
            AppError::QuotaExhausted => (
                StatusCode::PAYMENT_REQUIRED,
                "quota_exhausted",
                self.to_string(),
            ),
            AppError::SubscriptionExists => (
                StatusCode::CONFLICT,
                "subscription_exists",
                self.to_string(),
            ),
            AppError::GenerationUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "generation_unavailable",
                self.to_string(),
            ),
            AppError::InvalidSignature => (
                StatusCode::BAD_REQUEST,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "provider_error",
                "The payment provider could not be reached".to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
            AppError::EntitlementRequired(_) => unreachable!("handled above"),
        };

        // Build JSON response body
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        // Return the response with status code and JSON body
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_denial_maps_to_402_with_redirect() {
        let response = AppError::EntitlementRequired(Capability::Optimize).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn quota_exhaustion_is_distinct_from_entitlement_denial() {
        let response = AppError::QuotaExhausted.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn payload_too_large_message_names_no_fixed_limit() {
        let response = AppError::PayloadTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        // The cap comes from MAX_UPLOAD_BYTES; the message must not bake
        // a specific size in.
        assert!(!text.contains("16"), "body: {text}");
        assert!(text.contains("upload size limit"));
    }

    #[test]
    fn generation_failure_is_not_an_entitlement_error() {
        let response = AppError::GenerationUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            AppError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::DocumentNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::CheckoutSessionNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::SubscriptionExists.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::PayloadTooLarge.into_response().status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::InvalidSignature.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Provider("boom".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::ExtractionFailed("empty".into())
                .into_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
