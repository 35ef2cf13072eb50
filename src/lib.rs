// Library exports for the API binary, maintenance tools and tests
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use config::Config;
use db::{Cache, Store};
use services::{calls::AnalysisQueue, instagram::InstagramClient};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub config: Arc<Config>,
    pub analysis: AnalysisQueue,
    pub instagram: Arc<InstagramClient>,
}
