pub mod admin;
pub mod auth;
pub mod billing;
pub mod businesses;
pub mod calls;
pub mod chatbot;
pub mod crud;
pub mod health;
pub mod metrics;
pub mod team;
pub mod webhooks;
