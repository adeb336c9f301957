pub mod account;
pub mod artifacts;
pub mod auth;
pub mod billing;
pub mod documents;
pub mod health;
pub mod webhooks;
