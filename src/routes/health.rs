use std::path::Path;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::AppState;

pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// The process is up and serving requests.
pub async fn live() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// Ready only when the database and the cache both answer.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = state.store.ping().await;
    let cache = state.cache.ping().await;

    match (db, cache) {
        (Ok(()), Ok(())) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        (db, cache) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": db.err().map(|e| e.to_string()),
                "cache": cache.err().map(|e| e.to_string()),
            })),
        ),
    }
}

pub async fn status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let started = Instant::now();
    let db = state.store.ping().await;
    let db_ms = started.elapsed().as_secs_f64() * 1000.0;

    let started = Instant::now();
    let cache = state.cache.ping().await;
    let cache_ms = started.elapsed().as_secs_f64() * 1000.0;

    let started = Instant::now();
    let storage = probe_storage(Path::new(&state.config.storage_dir)).await;
    let storage_ms = started.elapsed().as_secs_f64() * 1000.0;

    let healthy = db.is_ok() && cache.is_ok() && storage.is_ok();
    let check = |ok: bool, latency: f64, error: Option<String>| {
        json!({
            "status": if ok { "ok" } else { "error" },
            "latency_ms": (latency * 100.0).round() / 100.0,
            "error": error,
        })
    };

    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        code,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "database": check(db.is_ok(), db_ms, db.err().map(|e| e.to_string())),
                "cache": check(cache.is_ok(), cache_ms, cache.err().map(|e| e.to_string())),
                "storage": check(storage.is_ok(), storage_ms, storage.err().map(|e| e.to_string())),
            },
        })),
    )
}

/// Writes and removes a scratch file in `dir`.
pub async fn probe_storage(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let probe = dir.join(format!(".health-{}", Uuid::new_v4()));
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await
}
