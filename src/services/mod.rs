pub mod access;
pub mod analysis_provider;
pub mod auth;
pub mod calls;
pub mod chatbot;
pub mod instagram;
pub mod intent;
pub mod limits;
pub mod metrics;
pub mod records;
pub mod subscription;
pub mod tickets;
pub mod token_health;
