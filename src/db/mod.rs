pub mod cache;
pub mod memory;
pub mod postgres;
pub mod scope;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::QueryAs;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::models::{
    business::{Business, Membership},
    call::CallLog,
    dream_buyer::DreamBuyer,
    instagram::{InstagramAccount, InstagramConversation},
    kpi::KpiDailyActual,
    lead::Lead,
    offer::Offer,
    pipeline::PipelineStage,
    plan::{Plan, Subscription},
    user::User,
};

pub use cache::{Cache, MemoryCache, RedisCache};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use scope::TenantScope;

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the schema migrations embedded in ./migrations/
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("no active business selected")]
    NoTenant,
    #[error("{0} already exists")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Soft-delete visibility for reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trashed {
    #[default]
    Exclude,
    Include,
    Only,
}

impl Trashed {
    pub fn predicate(self) -> &'static str {
        match self {
            Trashed::Exclude => "deleted_at IS NULL",
            Trashed::Include => "TRUE",
            Trashed::Only => "deleted_at IS NOT NULL",
        }
    }

    pub fn admits(self, deleted_at: Option<DateTime<Utc>>) -> bool {
        match self {
            Trashed::Exclude => deleted_at.is_none(),
            Trashed::Include => true,
            Trashed::Only => deleted_at.is_some(),
        }
    }
}

pub type PgQueryAs<'q, T> = QueryAs<'q, Postgres, T, PgArguments>;

/// A row that belongs to exactly one business and is soft-deletable.
///
/// `COLUMNS` lists the entity's own columns (everything except `id`,
/// `business_id` and the timestamps); `bind_columns` binds them in that order.
pub trait TenantOwned:
    for<'r> FromRow<'r, PgRow> + Clone + Send + Sync + Unpin + 'static
{
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Uuid;
    fn business_id(&self) -> Uuid;
    fn set_business_id(&mut self, business_id: Uuid);
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>);

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self>;
}

/// Implements the bookkeeping accessors of [`TenantOwned`] for a row struct
/// with the standard `id`, `business_id`, `created_at`, `updated_at` and
/// `deleted_at` fields.
macro_rules! tenant_row_accessors {
    () => {
        fn id(&self) -> ::uuid::Uuid {
            self.id
        }
        fn business_id(&self) -> ::uuid::Uuid {
            self.business_id
        }
        fn set_business_id(&mut self, business_id: ::uuid::Uuid) {
            self.business_id = business_id;
        }
        fn created_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
            self.created_at
        }
        fn updated_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
            self.updated_at
        }
        fn set_updated_at(&mut self, at: ::chrono::DateTime<::chrono::Utc>) {
            self.updated_at = at;
        }
        fn deleted_at(&self) -> Option<::chrono::DateTime<::chrono::Utc>> {
            self.deleted_at
        }
        fn set_deleted_at(&mut self, at: Option<::chrono::DateTime<::chrono::Utc>>) {
            self.deleted_at = at;
        }
    };
}
pub(crate) use tenant_row_accessors;

/// Applies the scope's ownership rule to a row about to be inserted.
/// A nil `business_id` on the row counts as "not supplied".
pub fn stamp_row<T: TenantOwned>(scope: &TenantScope, mut row: T) -> StoreResult<T> {
    let requested = Some(row.business_id()).filter(|id| !id.is_nil());
    let business_id = scope.stamp(requested)?;
    row.set_business_id(business_id);
    Ok(row)
}

/// Scoped CRUD over one tenant-owned table. Every method takes the caller's
/// scope; there is no unscoped variant.
#[async_trait]
pub trait Repository<T: TenantOwned>: Send + Sync {
    async fn list(&self, scope: &TenantScope, trashed: Trashed) -> StoreResult<Vec<T>>;
    async fn find(&self, scope: &TenantScope, id: Uuid, trashed: Trashed) -> StoreResult<Option<T>>;
    /// Live (not trashed) rows visible under the scope.
    async fn count(&self, scope: &TenantScope) -> StoreResult<i64>;
    async fn insert(&self, scope: &TenantScope, row: T) -> StoreResult<T>;
    /// Writes the entity columns of `row`. The owning business never changes.
    async fn update(&self, scope: &TenantScope, row: T) -> StoreResult<T>;
    async fn soft_delete(&self, scope: &TenantScope, id: Uuid) -> StoreResult<()>;
    async fn restore(&self, scope: &TenantScope, id: Uuid) -> StoreResult<T>;
    /// Hard-deletes rows trashed before `before`. Returns the number removed.
    async fn purge_trashed(&self, scope: &TenantScope, before: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn set_current_business(&self, user_id: Uuid, business_id: Option<Uuid>) -> StoreResult<()>;

    async fn create_business(&self, name: &str, slug: &str, owner_id: Uuid) -> StoreResult<Business>;
    async fn find_business(&self, id: Uuid) -> StoreResult<Option<Business>>;
    async fn list_businesses(&self) -> StoreResult<Vec<Business>>;

    async fn add_membership(&self, business_id: Uuid, user_id: Uuid, role: &str) -> StoreResult<Membership>;
    async fn find_membership(&self, business_id: Uuid, user_id: Uuid) -> StoreResult<Option<Membership>>;
    async fn remove_membership(&self, business_id: Uuid, user_id: Uuid) -> StoreResult<()>;
    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>>;
    async fn memberships_for_business(&self, business_id: Uuid) -> StoreResult<Vec<Membership>>;
    /// Members other than the owner.
    async fn count_team_members(&self, business_id: Uuid) -> StoreResult<i64>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Inserts the plan unless one with the same slug exists.
    async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()>;
    async fn list_plans(&self) -> StoreResult<Vec<Plan>>;
    async fn find_plan(&self, id: Uuid) -> StoreResult<Option<Plan>>;
    async fn find_plan_by_slug(&self, slug: &str) -> StoreResult<Option<Plan>>;

    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<Subscription>;
    /// Newest first.
    async fn subscriptions_for(&self, business_id: Uuid) -> StoreResult<Vec<Subscription>>;
    async fn set_subscription_status(&self, id: Uuid, status: &str) -> StoreResult<()>;
    /// Marks subscriptions whose paid or trial window ended before `now` as expired.
    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn count_leads_created_since(&self, business_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64>;
    /// Live lead attached to an Instagram conversation, if any.
    async fn find_lead_by_conversation(
        &self,
        scope: &TenantScope,
        conversation_id: Uuid,
    ) -> StoreResult<Option<Lead>>;
    /// Inserts the lead unless one already exists for its conversation.
    /// Returns the stored lead and whether it was created by this call.
    async fn insert_lead_once(&self, scope: &TenantScope, lead: Lead) -> StoreResult<(Lead, bool)>;
}

#[async_trait]
pub trait CallStore: Send + Sync {
    /// Seconds of calls created since `since` whose analysis is running or done.
    async fn analyzed_seconds_since(&self, business_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Cross-tenant lookup used by webhook ingress to resolve the owning business.
    async fn find_account_by_instagram_id(&self, instagram_id: &str) -> StoreResult<Option<InstagramAccount>>;
    async fn find_or_create_conversation(
        &self,
        scope: &TenantScope,
        account: &InstagramAccount,
        participant_id: &str,
        participant_username: Option<&str>,
    ) -> StoreResult<InstagramConversation>;
    /// Records an inbound message. Returns false when the message id was
    /// already recorded (duplicate delivery).
    async fn record_message_once(
        &self,
        conversation: &InstagramConversation,
        message_id: &str,
        text: &str,
    ) -> StoreResult<bool>;
    /// Drops a recorded inbound message so its next delivery is handled again.
    async fn forget_message(&self, message_id: &str) -> StoreResult<()>;
}

/// Everything the API needs from persistence.
#[async_trait]
pub trait Store:
    AccountStore
    + BillingStore
    + LeadStore
    + CallStore
    + ChatStore
    + Repository<Lead>
    + Repository<Offer>
    + Repository<KpiDailyActual>
    + Repository<DreamBuyer>
    + Repository<PipelineStage>
    + Repository<CallLog>
    + Repository<InstagramAccount>
    + Repository<InstagramConversation>
{
    async fn ping(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trashed_predicates() {
        assert_eq!(Trashed::Exclude.predicate(), "deleted_at IS NULL");
        assert_eq!(Trashed::Only.predicate(), "deleted_at IS NOT NULL");
        let now = Some(Utc::now());
        assert!(!Trashed::Exclude.admits(now));
        assert!(Trashed::Include.admits(now));
        assert!(Trashed::Include.admits(None));
        assert!(!Trashed::Only.admits(None));
    }
}
