//! Shared application state handed to every handler.

use crate::config::Config;
use crate::db::DbPool;
use crate::services::generation_service::GenerationClient;
use crate::services::stripe_service::StripeClient;

/// Everything a request handler might need, built once at startup.
///
/// All members are clone-cheap (pools and HTTP clients are reference-counted
/// internally), so Axum can clone the state per request freely.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub generation: GenerationClient,
    pub stripe: StripeClient,
    pub config: Config,
}
