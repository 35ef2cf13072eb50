use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::Store,
    error::AppError,
    models::plan::{
        DowngradeIssue, Plan, PlanFeatures, PlanLimits, Resource, Subscription, SubscriptionStatus,
    },
    services::limits::PlanGate,
};

pub const TRIAL_PLAN: &str = "start";
const CURRENCY: &str = "UZS";

fn plan(
    slug: &str,
    name: &str,
    price_monthly: i64,
    sort_order: i32,
    limits: PlanLimits,
    features: PlanFeatures,
) -> Plan {
    Plan {
        id: Uuid::new_v4(),
        slug: slug.into(),
        name: name.into(),
        price_monthly,
        price_yearly: price_monthly * 10,
        limits,
        features,
        is_active: true,
        sort_order,
    }
}

/// Built-in plan catalog.
pub fn catalog() -> Vec<Plan> {
    vec![
        plan(
            "free",
            "Free",
            0,
            0,
            PlanLimits {
                team_member_limit: Some(1),
                lead_limit: Some(100),
                audio_minutes_limit: Some(0),
                chatbot_channel_limit: Some(0),
                telegram_bot_limit: Some(1),
                ai_requests_limit: Some(20),
                storage_limit_mb: Some(100),
                instagram_account_limit: Some(0),
            },
            PlanFeatures {
                highlights: vec!["CRM".into(), "Telegram bot".into()],
                ..Default::default()
            },
        ),
        plan(
            "start",
            "Start",
            299_000,
            1,
            PlanLimits {
                team_member_limit: Some(2),
                lead_limit: Some(500),
                audio_minutes_limit: Some(60),
                chatbot_channel_limit: Some(1),
                telegram_bot_limit: Some(2),
                ai_requests_limit: Some(200),
                storage_limit_mb: Some(1024),
                instagram_account_limit: Some(1),
            },
            PlanFeatures {
                instagram: true,
                highlights: vec!["Instagram chatbot".into(), "Call analysis".into()],
                ..Default::default()
            },
        ),
        plan(
            "business",
            "Business",
            799_000,
            2,
            PlanLimits {
                team_member_limit: Some(10),
                lead_limit: Some(10_000),
                audio_minutes_limit: Some(400),
                chatbot_channel_limit: Some(3),
                telegram_bot_limit: Some(5),
                ai_requests_limit: Some(2_000),
                storage_limit_mb: Some(10_240),
                instagram_account_limit: Some(3),
            },
            PlanFeatures {
                hr_tasks: true,
                instagram: true,
                amocrm: true,
                highlights: vec!["HR tasks".into(), "amoCRM".into()],
                ..Default::default()
            },
        ),
        plan(
            "premium",
            "Premium",
            1_499_000,
            3,
            PlanLimits::default(),
            PlanFeatures {
                hr_tasks: true,
                hr_bot: true,
                anti_fraud: true,
                instagram: true,
                amocrm: true,
                highlights: vec!["Unlimited".into(), "Anti-fraud".into(), "HR bot".into()],
            },
        ),
    ]
}

pub struct SubscriptionService;

impl SubscriptionService {
    /// Inserts catalog plans that are not in the store yet.
    pub async fn seed_catalog(store: &dyn Store) -> anyhow::Result<()> {
        for plan in catalog() {
            store.upsert_plan(&plan).await?;
        }
        Ok(())
    }

    /// Most recent subscription that is running at `now`.
    pub async fn active(
        store: &dyn Store,
        business_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let subs = store.subscriptions_for(business_id).await?;
        Ok(subs.into_iter().find(|s| s.is_active_at(now)))
    }

    pub async fn active_plan(
        store: &dyn Store,
        business_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Subscription, Plan), AppError> {
        let sub = Self::active(store, business_id, now)
            .await?
            .ok_or(AppError::NoActiveSubscription)?;
        let plan = store
            .find_plan(sub.plan_id)
            .await?
            .ok_or(AppError::NoActiveSubscription)?;
        Ok((sub, plan))
    }

    async fn cancel_running(store: &dyn Store, business_id: Uuid) -> Result<(), AppError> {
        for sub in store.subscriptions_for(business_id).await? {
            if matches!(
                sub.status(),
                Some(SubscriptionStatus::Active | SubscriptionStatus::Trialing)
            ) {
                store
                    .set_subscription_status(sub.id, SubscriptionStatus::Cancelled.as_str())
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn start_trial(
        store: &dyn Store,
        business_id: Uuid,
        trial_days: i64,
    ) -> Result<Subscription, AppError> {
        let plan = store
            .find_plan_by_slug(TRIAL_PLAN)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Trial plan '{TRIAL_PLAN}' is missing")))?;
        Self::cancel_running(store, business_id).await?;

        let now = Utc::now();
        let trial_end = now + Duration::days(trial_days);
        let sub = Subscription {
            id: Uuid::new_v4(),
            business_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Trialing.as_str().into(),
            starts_at: now,
            ends_at: Some(trial_end),
            trial_ends_at: Some(trial_end),
            amount: 0,
            currency: CURRENCY.into(),
            created_at: now,
            updated_at: now,
        };
        Ok(store.insert_subscription(&sub).await?)
    }

    /// Resources whose current usage exceeds `target`'s ceilings.
    pub async fn downgrade_issues(
        store: &dyn Store,
        business_id: Uuid,
        target: &Plan,
        now: DateTime<Utc>,
    ) -> Result<Vec<DowngradeIssue>, AppError> {
        let mut issues = Vec::new();
        for resource in Resource::ALL {
            let Some(limit) = target.limits.ceiling(resource) else {
                continue;
            };
            let used = PlanGate::usage(store, business_id, resource, now).await?;
            if used > limit {
                issues.push(DowngradeIssue {
                    resource,
                    label: resource.label(),
                    used,
                    limit,
                });
            }
        }
        Ok(issues)
    }

    /// Moves the business to `plan_slug` for one month.
    pub async fn change_plan(
        store: &dyn Store,
        business_id: Uuid,
        plan_slug: &str,
    ) -> Result<(Subscription, Plan), AppError> {
        let now = Utc::now();
        let target = store
            .find_plan_by_slug(plan_slug)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::not_found("Plan"))?;

        let issues = Self::downgrade_issues(store, business_id, &target, now).await?;
        if !issues.is_empty() {
            return Err(AppError::DowngradeBlocked(issues));
        }

        Self::cancel_running(store, business_id).await?;
        let ends_at = now.checked_add_months(Months::new(1)).unwrap_or(now + Duration::days(30));
        let sub = Subscription {
            id: Uuid::new_v4(),
            business_id,
            plan_id: target.id,
            status: SubscriptionStatus::Active.as_str().into(),
            starts_at: now,
            ends_at: Some(ends_at),
            trial_ends_at: None,
            amount: target.price_monthly,
            currency: CURRENCY.into(),
            created_at: now,
            updated_at: now,
        };
        let sub = store.insert_subscription(&sub).await?;
        info!("Business {business_id} moved to plan '{}'", target.slug);
        Ok((sub, target))
    }
}

/// Spawn a background task that expires finished subscriptions every hour.
pub fn start_expiry_sweep(store: Arc<dyn Store>) {
    tokio::spawn(async move {
        loop {
            match store.expire_subscriptions(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!("Subscription sweep: {n} subscription(s) expired"),
                Err(e) => warn!("Subscription sweep failed: {e}"),
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_matches_published_ceilings() {
        let plans = catalog();
        let by_slug = |slug: &str| plans.iter().find(|p| p.slug == slug).unwrap();

        let free = by_slug("free");
        assert_eq!(free.limits.ceiling(Resource::TeamMembers), Some(1));
        assert_eq!(free.limits.ceiling(Resource::MonthlyLeads), Some(100));
        assert_eq!(free.limits.ceiling(Resource::AudioMinutes), Some(0));

        let start = by_slug("start");
        assert_eq!(start.price_monthly, 299_000);
        assert_eq!(start.limits.ceiling(Resource::AudioMinutes), Some(60));

        let business = by_slug("business");
        assert_eq!(business.limits.ceiling(Resource::TeamMembers), Some(10));
        assert_eq!(business.limits.ceiling(Resource::AudioMinutes), Some(400));

        let premium = by_slug("premium");
        for resource in Resource::ALL {
            assert_eq!(premium.limits.ceiling(resource), None);
        }
    }
}
