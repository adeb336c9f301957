//! Data models representing database entities and API payloads.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response types exchanged with clients and the payment
//! provider.

/// User account model and auth payloads
pub mod account;

/// Billing entities: payments, grants, subscriptions, entitlement status
pub mod billing;

/// Uploaded résumé documents and generated artifacts
pub mod document;

/// Payment provider object shapes (webhook events, checkout sessions)
pub mod provider;
