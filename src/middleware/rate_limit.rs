use crate::{db::Cache, error::AppError};

/// Checks a keyed rate limit held in the cache.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, the window of `window_secs` starts
/// - Returns 429 if counter exceeds `max_attempts`
///
/// A cache outage lets the request through.
pub async fn check_rate_limit(
    cache: &dyn Cache,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> Result<(), AppError> {
    let count = match cache.increment(key, window_secs).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("Rate limit check skipped for {key}: {e}");
            return Ok(());
        }
    };

    if count > max_attempts {
        return Err(AppError::RateLimited(
            "Too many attempts. Try again in a minute.".into(),
        ));
    }

    Ok(())
}
