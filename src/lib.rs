pub mod access;
pub mod auth;
pub mod comments;
pub mod error;
pub mod models;
pub mod openapi;
pub mod password;
pub mod payment;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod security;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState, RegistrationPolicy};
pub use security::SecurityHeaders;
