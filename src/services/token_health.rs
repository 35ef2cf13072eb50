use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{info, warn};

use crate::db::{Repository, Store, TenantScope, Trashed};
use crate::models::instagram::InstagramAccount;
use crate::services::instagram::InstagramClient;

/// Tokens expiring within this many days are refreshed.
const REFRESH_WITHIN_DAYS: i64 = 7;
const RUN_AT_HOUR_UTC: u32 = 3;

/// Spawn a background task that wakes up daily at 03:00 UTC and refreshes
/// Instagram tokens close to expiry.
pub fn start(store: Arc<dyn Store>, client: Arc<InstagramClient>) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let secs_today = now.hour() * 3600 + now.minute() * 60 + now.second();
            let target_secs = RUN_AT_HOUR_UTC * 3600;
            let wait = if secs_today < target_secs {
                target_secs - secs_today
            } else {
                86400 - secs_today + target_secs
            };
            tokio::time::sleep(tokio::time::Duration::from_secs(u64::from(wait))).await;

            match sweep(store.as_ref(), &client, Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!("Token health: refreshed {n} Instagram token(s)"),
                Err(e) => warn!("Token health: sweep failed: {e}"),
            }
        }
    });
}

pub fn needs_refresh(account: &InstagramAccount, now: DateTime<Utc>) -> bool {
    account.is_active
        && account
            .token_expires_at
            .is_some_and(|exp| exp < now + Duration::days(REFRESH_WITHIN_DAYS))
}

/// Platform job: reads accounts of every business.
async fn sweep(store: &dyn Store, client: &InstagramClient, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let accounts =
        Repository::<InstagramAccount>::list(store, &TenantScope::all_tenants(), Trashed::Exclude).await?;

    let mut refreshed = 0;
    for mut account in accounts.into_iter().filter(|a| needs_refresh(a, now)) {
        match client.refresh_token(&account.access_token).await {
            Ok(token) => {
                account.access_token = token.access_token;
                account.token_expires_at = Some(token.expires_at);
                account.updated_at = Utc::now();
                let scope = TenantScope::for_business(account.business_id);
                Repository::<InstagramAccount>::update(store, &scope, account).await?;
                refreshed += 1;
            }
            Err(e) => warn!("Token health: refresh failed for @{}: {e}", account.username),
        }
    }
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn account(expires_in_days: Option<i64>, active: bool) -> InstagramAccount {
        let now = Utc::now();
        InstagramAccount {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            instagram_id: "17841".into(),
            username: "shop".into(),
            access_token: "token".into(),
            token_expires_at: expires_in_days.map(|d| now + Duration::days(d)),
            is_active: active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn only_active_accounts_close_to_expiry() {
        let now = Utc::now();
        assert!(needs_refresh(&account(Some(2), true), now));
        assert!(!needs_refresh(&account(Some(30), true), now));
        assert!(!needs_refresh(&account(Some(2), false), now));
        assert!(!needs_refresh(&account(None, true), now));
    }
}
