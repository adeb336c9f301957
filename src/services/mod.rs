//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, entitlement decisions, and the
//! outbound calls to the generation API and the payment provider.

pub mod entitlement_service;
pub mod extraction_service;
pub mod generation_service;
pub mod reconciliation_service;
pub mod stripe_service;
