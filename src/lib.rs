pub mod admin;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod imaging;
pub mod intake;
pub mod models;
pub mod moderation;
pub mod openapi;
pub mod qr;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
