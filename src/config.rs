//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `PUBLIC_BASE_URL` (required): externally reachable base URL, used to
///   build checkout success/cancel redirects
/// - `OPENROUTER_API_KEY` (required): key for the text-generation API
/// - `STRIPE_SECRET_KEY` (required): payment provider API key
/// - `STRIPE_WEBHOOK_SECRET` (required): secret for webhook signature verification
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 5000
/// - `MAX_UPLOAD_BYTES` (optional): résumé upload size cap, defaults to 16 MiB
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub public_base_url: String,

    pub openrouter_api_key: String,

    pub stripe_secret_key: String,

    pub stripe_webhook_secret: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    5000
}

/// Default upload cap: 16 MiB.
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config
    /// struct, then validates the fields that would otherwise only fail deep
    /// inside a request.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing
    /// - `PUBLIC_BASE_URL` is not a valid absolute URL
    pub fn from_env() -> anyhow::Result<Self> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Parse environment variables into Config struct
        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.public_base_url)
            .map_err(|e| anyhow::anyhow!("PUBLIC_BASE_URL is not a valid URL: {e}"))?;

        if self.stripe_webhook_secret.is_empty() {
            anyhow::bail!("STRIPE_WEBHOOK_SECRET must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> Vec<(String, String)> {
        vec![
            ("DATABASE_URL".into(), "postgres://localhost/cv".into()),
            ("PUBLIC_BASE_URL".into(), "https://cv.example.com".into()),
            ("OPENROUTER_API_KEY".into(), "sk-or-v1-test".into()),
            ("STRIPE_SECRET_KEY".into(), "sk_test_123".into()),
            ("STRIPE_WEBHOOK_SECRET".into(), "whsec_123".into()),
        ]
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let config: Config = envy::from_iter(base_vars()).expect("config parses");
        assert_eq!(config.server_port, 5000);
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut vars = base_vars();
        vars[1].1 = "not a url".into();
        let config: Config = envy::from_iter(vars).expect("config parses");
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_required_var_fails() {
        let vars: Vec<(String, String)> = base_vars().into_iter().skip(1).collect();
        assert!(envy::from_iter::<_, Config>(vars).is_err());
    }
}
