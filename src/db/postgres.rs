use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    stamp_row, AccountStore, BillingStore, CallStore, ChatStore, LeadStore, PgQueryAs, Repository,
    Store, StoreError, StoreResult, TenantOwned, TenantScope, Trashed,
};
use crate::models::{
    business::{Business, Membership},
    instagram::{InstagramAccount, InstagramConversation},
    lead::Lead,
    plan::{Plan, Subscription},
    user::User,
};

/// PostgreSQL-backed store. Tenant tables share one schema and are
/// partitioned by their `business_id` column.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_conflict(err: sqlx::Error, what: &str) -> StoreError {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        StoreError::Conflict(what.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn bind_scope<'q, T>(query: PgQueryAs<'q, T>, scope: &TenantScope) -> PgQueryAs<'q, T> {
    match scope.business_id() {
        Some(id) => query.bind(id),
        None => query,
    }
}

fn insert_sql<T: TenantOwned>(on_conflict: &str) -> String {
    let placeholders: Vec<String> = (0..T::COLUMNS.len()).map(|i| format!("${}", i + 5)).collect();
    format!(
        "INSERT INTO {} (id, business_id, created_at, updated_at, {})
         VALUES ($1, $2, $3, $4, {})
         {on_conflict}
         RETURNING *",
        T::TABLE,
        T::COLUMNS.join(", "),
        placeholders.join(", ")
    )
}

fn bind_insert<'q, T: TenantOwned>(sql: &'q str, row: &'q T) -> PgQueryAs<'q, T> {
    let query = sqlx::query_as::<_, T>(sql)
        .bind(row.id())
        .bind(row.business_id())
        .bind(row.created_at())
        .bind(row.updated_at());
    row.bind_columns(query)
}

#[async_trait]
impl<T: TenantOwned> Repository<T> for PgStore {
    async fn list(&self, scope: &TenantScope, trashed: Trashed) -> StoreResult<Vec<T>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} AND {} ORDER BY created_at DESC",
            T::TABLE,
            scope.filter_clause(1),
            trashed.predicate()
        );
        let query = bind_scope(sqlx::query_as::<_, T>(&sql), scope);
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn find(&self, scope: &TenantScope, id: Uuid, trashed: Trashed) -> StoreResult<Option<T>> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = $1 AND {} AND {}",
            T::TABLE,
            scope.filter_clause(2),
            trashed.predicate()
        );
        let query = bind_scope(sqlx::query_as::<_, T>(&sql).bind(id), scope);
        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn count(&self, scope: &TenantScope) -> StoreResult<i64> {
        let sql = format!(
            "SELECT COUNT(*)::BIGINT FROM {} WHERE {} AND deleted_at IS NULL",
            T::TABLE,
            scope.filter_clause(1)
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(id) = scope.business_id() {
            query = query.bind(id);
        }
        Ok(query.fetch_one(&self.pool).await?)
    }

    async fn insert(&self, scope: &TenantScope, row: T) -> StoreResult<T> {
        let row = stamp_row(scope, row)?;
        let sql = insert_sql::<T>("");
        bind_insert(&sql, &row)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_conflict(e, T::TABLE))
    }

    async fn update(&self, scope: &TenantScope, row: T) -> StoreResult<T> {
        let n = T::COLUMNS.len();
        let sets: Vec<String> = T::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ${}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}, updated_at = ${}
             WHERE id = ${} AND deleted_at IS NULL AND {}
             RETURNING *",
            T::TABLE,
            sets.join(", "),
            n + 1,
            n + 2,
            scope.filter_clause(n + 3)
        );
        let query = row
            .bind_columns(sqlx::query_as::<_, T>(&sql))
            .bind(Utc::now())
            .bind(row.id());
        bind_scope(query, scope)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_conflict(e, T::TABLE))?
            .ok_or(StoreError::NotFound)
    }

    async fn soft_delete(&self, scope: &TenantScope, id: Uuid) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL AND {}",
            T::TABLE,
            scope.filter_clause(2)
        );
        let mut query = sqlx::query(&sql).bind(id);
        if let Some(business_id) = scope.business_id() {
            query = query.bind(business_id);
        }
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn restore(&self, scope: &TenantScope, id: Uuid) -> StoreResult<T> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NULL, updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NOT NULL AND {}
             RETURNING *",
            T::TABLE,
            scope.filter_clause(2)
        );
        let query = bind_scope(sqlx::query_as::<_, T>(&sql).bind(id), scope);
        query.fetch_optional(&self.pool).await?.ok_or(StoreError::NotFound)
    }

    async fn purge_trashed(&self, scope: &TenantScope, before: DateTime<Utc>) -> StoreResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE deleted_at IS NOT NULL AND deleted_at < $1 AND {}",
            T::TABLE,
            scope.filter_clause(2)
        );
        let mut query = sqlx::query(&sql).bind(before);
        if let Some(business_id) = scope.business_id() {
            query = query.bind(business_id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, password_hash)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email.to_lowercase())
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_conflict(e, "email"))
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn set_current_business(&self, user_id: Uuid, business_id: Option<Uuid>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET current_business_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(business_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_business(&self, name: &str, slug: &str, owner_id: Uuid) -> StoreResult<Business> {
        sqlx::query_as::<_, Business>(
            "INSERT INTO businesses (id, name, slug, owner_id)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slug)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_conflict(e, "business slug"))
    }

    async fn find_business(&self, id: Uuid) -> StoreResult<Option<Business>> {
        Ok(sqlx::query_as::<_, Business>("SELECT * FROM businesses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_businesses(&self) -> StoreResult<Vec<Business>> {
        Ok(sqlx::query_as::<_, Business>("SELECT * FROM businesses ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn add_membership(&self, business_id: Uuid, user_id: Uuid, role: &str) -> StoreResult<Membership> {
        sqlx::query_as::<_, Membership>(
            "INSERT INTO business_users (business_id, user_id, role)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(business_id)
        .bind(user_id)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_conflict(e, "membership"))
    }

    async fn find_membership(&self, business_id: Uuid, user_id: Uuid) -> StoreResult<Option<Membership>> {
        Ok(sqlx::query_as::<_, Membership>(
            "SELECT * FROM business_users WHERE business_id = $1 AND user_id = $2",
        )
        .bind(business_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn remove_membership(&self, business_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM business_users WHERE business_id = $1 AND user_id = $2")
            .bind(business_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        // Users whose active business just disappeared fall back to none.
        sqlx::query(
            "UPDATE users SET current_business_id = NULL
             WHERE id = $1 AND current_business_id = $2",
        )
        .bind(user_id)
        .bind(business_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        Ok(sqlx::query_as::<_, Membership>(
            "SELECT * FROM business_users WHERE user_id = $1 ORDER BY joined_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn memberships_for_business(&self, business_id: Uuid) -> StoreResult<Vec<Membership>> {
        Ok(sqlx::query_as::<_, Membership>(
            "SELECT * FROM business_users WHERE business_id = $1 ORDER BY joined_at",
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_team_members(&self, business_id: Uuid) -> StoreResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::BIGINT FROM business_users WHERE business_id = $1 AND role <> 'owner'",
        )
        .bind(business_id)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO plans (id, slug, name, price_monthly, price_yearly,
                team_member_limit, lead_limit, audio_minutes_limit, chatbot_channel_limit,
                telegram_bot_limit, ai_requests_limit, storage_limit_mb, instagram_account_limit,
                features, is_active, sort_order)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             ON CONFLICT (slug) DO NOTHING",
        )
        .bind(plan.id)
        .bind(&plan.slug)
        .bind(&plan.name)
        .bind(plan.price_monthly)
        .bind(plan.price_yearly)
        .bind(plan.limits.team_member_limit)
        .bind(plan.limits.lead_limit)
        .bind(plan.limits.audio_minutes_limit)
        .bind(plan.limits.chatbot_channel_limit)
        .bind(plan.limits.telegram_bot_limit)
        .bind(plan.limits.ai_requests_limit)
        .bind(plan.limits.storage_limit_mb)
        .bind(plan.limits.instagram_account_limit)
        .bind(sqlx::types::Json(&plan.features))
        .bind(plan.is_active)
        .bind(plan.sort_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        Ok(sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE is_active = TRUE ORDER BY sort_order")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_plan(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        Ok(sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_plan_by_slug(&self, slug: &str) -> StoreResult<Option<Plan>> {
        Ok(sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_subscription(&self, sub: &Subscription) -> StoreResult<Subscription> {
        Ok(sqlx::query_as::<_, Subscription>(
            "INSERT INTO subscriptions (id, business_id, plan_id, status, starts_at, ends_at,
                trial_ends_at, amount, currency, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(sub.id)
        .bind(sub.business_id)
        .bind(sub.plan_id)
        .bind(&sub.status)
        .bind(sub.starts_at)
        .bind(sub.ends_at)
        .bind(sub.trial_ends_at)
        .bind(sub.amount)
        .bind(&sub.currency)
        .bind(sub.created_at)
        .bind(sub.updated_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn subscriptions_for(&self, business_id: Uuid) -> StoreResult<Vec<Subscription>> {
        Ok(sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE business_id = $1 ORDER BY created_at DESC",
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn set_subscription_status(&self, id: Uuid, status: &str) -> StoreResult<()> {
        sqlx::query("UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = 'expired', updated_at = NOW()
             WHERE (status = 'active' AND (ends_at IS NULL OR ends_at < $1))
                OR (status = 'trialing'
                    AND (trial_ends_at IS NULL OR trial_ends_at < $1)
                    AND (ends_at IS NULL OR ends_at < $1))",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn count_leads_created_since(&self, business_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::BIGINT FROM leads
             WHERE business_id = $1 AND created_at >= $2 AND deleted_at IS NULL",
        )
        .bind(business_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_lead_by_conversation(
        &self,
        scope: &TenantScope,
        conversation_id: Uuid,
    ) -> StoreResult<Option<Lead>> {
        let sql = format!(
            "SELECT * FROM leads
             WHERE instagram_conversation_id = $1 AND deleted_at IS NULL AND {}",
            scope.filter_clause(2)
        );
        let query = bind_scope(sqlx::query_as::<_, Lead>(&sql).bind(conversation_id), scope);
        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn insert_lead_once(&self, scope: &TenantScope, lead: Lead) -> StoreResult<(Lead, bool)> {
        let lead = stamp_row(scope, lead)?;
        let sql = insert_sql::<Lead>("ON CONFLICT (instagram_conversation_id) DO NOTHING");
        let inserted = bind_insert(&sql, &lead)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_conflict(e, "lead"))?;
        if let Some(created) = inserted {
            return Ok((created, true));
        }

        // Lost the race (or the conversation already has a lead): return the winner.
        let conversation_id = lead.instagram_conversation_id.ok_or(StoreError::NotFound)?;
        let sql = format!(
            "SELECT * FROM leads WHERE instagram_conversation_id = $1 AND {}",
            scope.filter_clause(2)
        );
        let existing = bind_scope(sqlx::query_as::<_, Lead>(&sql).bind(conversation_id), scope)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok((existing, false))
    }
}

#[async_trait]
impl CallStore for PgStore {
    async fn analyzed_seconds_since(&self, business_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(duration), 0)::BIGINT FROM call_logs
             WHERE business_id = $1 AND created_at >= $2 AND deleted_at IS NULL
               AND analysis_status IN ('transcribing', 'analyzing', 'completed')",
        )
        .bind(business_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn find_account_by_instagram_id(&self, instagram_id: &str) -> StoreResult<Option<InstagramAccount>> {
        Ok(sqlx::query_as::<_, InstagramAccount>(
            "SELECT * FROM instagram_accounts
             WHERE instagram_id = $1 AND is_active = TRUE AND deleted_at IS NULL
             LIMIT 1",
        )
        .bind(instagram_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_or_create_conversation(
        &self,
        scope: &TenantScope,
        account: &InstagramAccount,
        participant_id: &str,
        participant_username: Option<&str>,
    ) -> StoreResult<InstagramConversation> {
        if !scope.admits(account.business_id) {
            return Err(StoreError::NotFound);
        }
        Ok(sqlx::query_as::<_, InstagramConversation>(
            "INSERT INTO instagram_conversations
                (id, business_id, account_id, participant_id, participant_username, status)
             VALUES ($1, $2, $3, $4, $5, 'bot')
             ON CONFLICT (account_id, participant_id) DO UPDATE
                SET participant_username = COALESCE(
                        EXCLUDED.participant_username,
                        instagram_conversations.participant_username),
                    deleted_at = NULL
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(account.business_id)
        .bind(account.id)
        .bind(participant_id)
        .bind(participant_username)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn record_message_once(
        &self,
        conversation: &InstagramConversation,
        message_id: &str,
        text: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO instagram_messages (id, business_id, conversation_id, message_id, direction, body)
             VALUES ($1, $2, $3, $4, 'inbound', $5)
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(conversation.business_id)
        .bind(conversation.id)
        .bind(message_id)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn forget_message(&self, message_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM instagram_messages WHERE message_id = $1 AND direction = 'inbound'")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
