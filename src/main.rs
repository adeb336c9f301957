//! CV Optimizer Service - Main Application Entry Point
//!
//! REST API for AI-assisted résumé work: upload a PDF résumé, get it scored
//! against a job posting, and, with the right purchase, get it optimized plus
//! cover letters, interview questions and skills-gap reports. Purchases run
//! through the payment provider's hosted checkout and are reconciled from
//! webhooks.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: Bearer access tokens with SHA-256 hashing
//! - **Generation**: OpenRouter chat-completions API
//! - **Billing**: Stripe-style hosted checkout + signed webhooks
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Build the generation and payment-provider clients (a malformed
//!    generation API key aborts startup here)
//! 3. Create database connection pool and run migrations
//! 4. Build HTTP router with routes and middleware
//! 5. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::services::generation_service::{GenerationClient, GenerationConfig};
use crate::services::stripe_service::StripeClient;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Build outbound clients. The generation client validates its API key
    // here, so a misconfigured deployment dies at startup.
    let generation = GenerationClient::new(GenerationConfig::new(config.openrouter_api_key.clone()))?;
    let stripe = StripeClient::new(config.stripe_secret_key.clone());

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let max_upload_bytes = config.max_upload_bytes;
    let server_port = config.server_port;

    let state = AppState {
        pool,
        generation,
        stripe,
        config,
    };

    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        // Document routes
        .route("/api/v1/documents", post(handlers::documents::upload))
        .route("/api/v1/documents", get(handlers::documents::list))
        .route(
            "/api/v1/documents/{session_token}",
            get(handlers::documents::get),
        )
        .route(
            "/api/v1/documents/{session_token}/optimize",
            post(handlers::documents::optimize),
        )
        .route(
            "/api/v1/documents/{session_token}/analyze",
            post(handlers::documents::analyze),
        )
        // Artifact routes (cover letter, interview questions, skills gap)
        .route(
            "/api/v1/documents/{session_token}/artifacts/{kind}",
            post(handlers::artifacts::generate),
        )
        .route(
            "/api/v1/artifacts/{kind}/{session_token}",
            get(handlers::artifacts::get),
        )
        // Account routes
        .route("/api/v1/account/profile", get(handlers::account::profile))
        // Billing routes
        .route("/api/v1/billing/status", get(handlers::billing::status))
        .route("/api/v1/billing/pricing", get(handlers::billing::pricing))
        .route(
            "/api/v1/billing/payments",
            get(handlers::billing::payment_history),
        )
        .route(
            "/api/v1/billing/checkout",
            post(handlers::billing::create_checkout),
        )
        .route(
            "/api/v1/billing/checkout/complete",
            get(handlers::billing::complete_checkout),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine authenticated routes with public routes
    let app = Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        // Webhook deliveries authenticate by signature, not bearer token
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
        // Merge authenticated routes
        .merge(authenticated_routes)
        // Room for the PDF plus the multipart framing
        .layer(DefaultBodyLimit::max(max_upload_bytes + 64 * 1024))
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        // Share state with all handlers via State extraction
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{server_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start serving HTTP requests
    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app).await?;

    Ok(())
}
