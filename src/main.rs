use std::sync::Arc;

use redis::Client as RedisClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biznespilot_api::{
    app,
    config::Config,
    db::{self, Cache, PgStore, RedisCache, Store},
    services::{
        analysis_provider::{AnalysisProvider, DisabledProvider, HttpAnalysisProvider},
        calls::{self, AnalysisQueue},
        instagram::InstagramClient,
        metrics,
        subscription::{self, SubscriptionService},
        token_health,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    info!("Redis connected");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let cache: Arc<dyn Cache> = Arc::new(RedisCache::new(redis_conn));

    SubscriptionService::seed_catalog(store.as_ref()).await?;
    info!("Plan catalog up to date");

    let provider: Arc<dyn AnalysisProvider> = match config.analysis_api_url.as_deref() {
        Some(url) => {
            info!("Call analysis provider at {url}");
            Arc::new(HttpAnalysisProvider::new(url, config.analysis_api_key.clone()))
        }
        None => {
            info!("ANALYSIS_API_URL not set, call analysis disabled");
            Arc::new(DisabledProvider)
        }
    };
    let (analysis, rx) = AnalysisQueue::new();
    calls::start_worker(store.clone(), provider, rx, config.analysis_max_attempts);

    let instagram = Arc::new(InstagramClient::new(&config));

    subscription::start_expiry_sweep(store.clone());
    token_health::start(store.clone(), instagram.clone());
    metrics::start(store.clone());

    let state = AppState {
        store,
        cache,
        config: config.clone(),
        analysis,
        instagram,
    };

    let addr = format!("{}:{}", config.host, config.port);
    info!("BiznesPilot API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app::router(state)).await?;

    Ok(())
}
