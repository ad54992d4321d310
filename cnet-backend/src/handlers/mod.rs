pub mod auth;
pub mod credentials;
pub mod health;
pub mod infrastructure;
pub mod jobs;
pub mod metrics;
pub mod services;
