use chrono::{DateTime, Datelike, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    db::{Repository, Store, TenantScope},
    error::AppError,
    models::{
        instagram::InstagramAccount,
        plan::{Feature, LimitDecision, Resource, UsageStat},
    },
    services::{metrics::LIMIT_REJECTIONS, subscription::SubscriptionService},
};

/// Decides whether `requested` more units fit under `limit`.
///
/// `None` is unlimited. `Some(0)` means the resource is not part of the plan,
/// so even a zero-unit request is rejected.
pub fn evaluate(resource: Resource, limit: Option<i64>, used: i64, requested: i64) -> LimitDecision {
    match limit {
        None => LimitDecision {
            resource,
            used,
            requested,
            limit: None,
            remaining: None,
            allowed: true,
        },
        Some(limit) => LimitDecision {
            resource,
            used,
            requested,
            limit: Some(limit),
            remaining: Some((limit - used).max(0)),
            allowed: limit > 0 && used + requested <= limit,
        },
    }
}

/// First instant of the UTC calendar month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Plan ceilings applied to a business's live usage.
pub struct PlanGate;

impl PlanGate {
    /// Current consumption of `resource` over its usage window.
    pub async fn usage(
        store: &dyn Store,
        business_id: Uuid,
        resource: Resource,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let since = month_start(now);
        let used = match resource {
            Resource::TeamMembers => store.count_team_members(business_id).await?,
            Resource::MonthlyLeads => store.count_leads_created_since(business_id, since).await?,
            Resource::AudioMinutes => store.analyzed_seconds_since(business_id, since).await? / 60,
            Resource::InstagramAccounts => {
                Repository::<InstagramAccount>::count(store, &TenantScope::for_business(business_id)).await?
            }
        };
        Ok(used)
    }

    pub async fn decide(
        store: &dyn Store,
        business_id: Uuid,
        resource: Resource,
        requested: i64,
        now: DateTime<Utc>,
    ) -> Result<LimitDecision, AppError> {
        let (_, plan) = SubscriptionService::active_plan(store, business_id, now).await?;
        let used = Self::usage(store, business_id, resource, now).await?;
        Ok(evaluate(resource, plan.limits.ceiling(resource), used, requested))
    }

    /// Like [`PlanGate::decide`], but a rejection becomes `FEATURE_LIMIT_EXCEEDED`.
    pub async fn check_quota(
        store: &dyn Store,
        business_id: Uuid,
        resource: Resource,
        requested: i64,
    ) -> Result<LimitDecision, AppError> {
        let decision = Self::decide(store, business_id, resource, requested, Utc::now()).await?;
        if !decision.allowed {
            LIMIT_REJECTIONS.with_label_values(&[resource.as_str()]).inc();
            tracing::info!(
                "Limit reached for business {business_id}: {resource} used {} + {} > {:?}",
                decision.used,
                decision.requested,
                decision.limit
            );
            return Err(AppError::LimitExceeded(decision));
        }
        Ok(decision)
    }

    pub async fn check_feature(store: &dyn Store, business_id: Uuid, feature: Feature) -> Result<(), AppError> {
        let (_, plan) = SubscriptionService::active_plan(store, business_id, Utc::now()).await?;
        if !plan.features.has(feature) {
            return Err(AppError::FeatureNotAvailable(feature.label()));
        }
        Ok(())
    }

    pub async fn usage_stats(store: &dyn Store, business_id: Uuid) -> Result<Vec<UsageStat>, AppError> {
        let now = Utc::now();
        let (_, plan) = SubscriptionService::active_plan(store, business_id, now).await?;
        let mut stats = Vec::with_capacity(Resource::ALL.len());
        for resource in Resource::ALL {
            let current = Self::usage(store, business_id, resource, now).await?;
            let limit = plan.limits.ceiling(resource);
            stats.push(usage_stat(resource, current, limit));
        }
        Ok(stats)
    }
}

pub fn usage_stat(resource: Resource, current: i64, limit: Option<i64>) -> UsageStat {
    let percentage = match limit {
        Some(l) if l > 0 => ((current as f64 / l as f64) * 1000.0).round() / 10.0,
        Some(_) => 100.0,
        None => 0.0,
    };
    UsageStat {
        resource,
        label: resource.label(),
        current,
        limit,
        percentage,
        is_unlimited: limit.is_none(),
        is_exceeded: limit.is_some_and(|l| current >= l),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unlimited_always_allows() {
        let d = evaluate(Resource::MonthlyLeads, None, 1_000_000, 50);
        assert!(d.allowed);
        assert_eq!(d.remaining, None);
    }

    #[test]
    fn zero_ceiling_disables_the_resource() {
        let d = evaluate(Resource::AudioMinutes, Some(0), 0, 1);
        assert!(!d.allowed);
        assert_eq!(d.remaining, Some(0));
    }

    #[test]
    fn request_must_fit_entirely() {
        assert!(evaluate(Resource::AudioMinutes, Some(60), 55, 5).allowed);
        let d = evaluate(Resource::AudioMinutes, Some(60), 59, 2);
        assert!(!d.allowed);
        assert_eq!(d.remaining, Some(1));
    }

    #[test]
    fn remaining_never_negative() {
        let d = evaluate(Resource::TeamMembers, Some(2), 5, 1);
        assert_eq!(d.remaining, Some(0));
    }

    #[test]
    fn month_start_is_first_instant_in_utc() {
        let now = Utc.with_ymd_and_hms(2025, 3, 17, 22, 45, 10).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        let first = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(month_start(first), first);
    }

    #[test]
    fn usage_stat_flags() {
        let s = usage_stat(Resource::MonthlyLeads, 50, Some(100));
        assert_eq!(s.percentage, 50.0);
        assert!(!s.is_exceeded);
        let s = usage_stat(Resource::TeamMembers, 1, Some(1));
        assert!(s.is_exceeded);
        let s = usage_stat(Resource::AudioMinutes, 10, None);
        assert!(s.is_unlimited);
        assert!(!s.is_exceeded);
    }
}
