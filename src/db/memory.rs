use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    stamp_row, AccountStore, BillingStore, CallStore, ChatStore, LeadStore, Repository, Store,
    StoreError, StoreResult, TenantOwned, TenantScope, Trashed,
};
use crate::models::{
    business::{Business, Membership},
    call::CallLog,
    instagram::{InstagramAccount, InstagramConversation},
    lead::Lead,
    plan::{Plan, Subscription, SubscriptionStatus},
    user::User,
};

/// In-process store with the same scoping rules as [`super::PgStore`].
/// Used by the test suite and for running the API without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    businesses: Vec<Business>,
    memberships: Vec<Membership>,
    plans: Vec<Plan>,
    subscriptions: Vec<Subscription>,
    message_ids: HashSet<String>,
    rows: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Tables {
    fn rows<T: TenantOwned>(&mut self) -> &mut Vec<T> {
        self.rows
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<T>::new()))
            .downcast_mut::<Vec<T>>()
            .expect("row table is keyed by its own type id")
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn visible<T: TenantOwned>(row: &T, scope: &TenantScope, trashed: Trashed) -> bool {
    scope.admits(row.business_id()) && trashed.admits(row.deleted_at())
}

#[async_trait]
impl<T: TenantOwned> Repository<T> for MemoryStore {
    async fn list(&self, scope: &TenantScope, trashed: Trashed) -> StoreResult<Vec<T>> {
        let mut tables = self.tables();
        let mut rows: Vec<T> = tables
            .rows::<T>()
            .iter()
            .filter(|r| visible(*r, scope, trashed))
            .cloned()
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
        Ok(rows)
    }

    async fn find(&self, scope: &TenantScope, id: Uuid, trashed: Trashed) -> StoreResult<Option<T>> {
        let mut tables = self.tables();
        Ok(tables
            .rows::<T>()
            .iter()
            .find(|r| r.id() == id && visible(*r, scope, trashed))
            .cloned())
    }

    async fn count(&self, scope: &TenantScope) -> StoreResult<i64> {
        let mut tables = self.tables();
        let count = tables
            .rows::<T>()
            .iter()
            .filter(|r| visible(*r, scope, Trashed::Exclude))
            .count();
        Ok(count as i64)
    }

    async fn insert(&self, scope: &TenantScope, row: T) -> StoreResult<T> {
        let row = stamp_row(scope, row)?;
        let mut tables = self.tables();
        let rows = tables.rows::<T>();
        if rows.iter().any(|r| r.id() == row.id()) {
            return Err(StoreError::Conflict(T::TABLE.to_string()));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, scope: &TenantScope, mut row: T) -> StoreResult<T> {
        let mut tables = self.tables();
        let slot = tables
            .rows::<T>()
            .iter_mut()
            .find(|r| r.id() == row.id() && visible(&**r, scope, Trashed::Exclude))
            .ok_or(StoreError::NotFound)?;
        row.set_business_id(slot.business_id());
        row.set_deleted_at(None);
        row.set_updated_at(Utc::now());
        *slot = row.clone();
        Ok(row)
    }

    async fn soft_delete(&self, scope: &TenantScope, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables();
        let slot = tables
            .rows::<T>()
            .iter_mut()
            .find(|r| r.id() == id && visible(&**r, scope, Trashed::Exclude))
            .ok_or(StoreError::NotFound)?;
        slot.set_deleted_at(Some(Utc::now()));
        Ok(())
    }

    async fn restore(&self, scope: &TenantScope, id: Uuid) -> StoreResult<T> {
        let mut tables = self.tables();
        let slot = tables
            .rows::<T>()
            .iter_mut()
            .find(|r| r.id() == id && visible(&**r, scope, Trashed::Only))
            .ok_or(StoreError::NotFound)?;
        slot.set_deleted_at(None);
        slot.set_updated_at(Utc::now());
        Ok(slot.clone())
    }

    async fn purge_trashed(&self, scope: &TenantScope, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables();
        let rows = tables.rows::<T>();
        let before_len = rows.len();
        rows.retain(|r| {
            let expired = r.deleted_at().is_some_and(|at| at < before);
            !(expired && scope.admits(r.business_id()))
        });
        Ok((before_len - rows.len()) as u64)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> StoreResult<User> {
        let email = email.to_lowercase();
        let mut tables = self.tables();
        if tables.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Conflict("email".into()));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            password_hash: password_hash.to_string(),
            is_super_admin: false,
            current_business_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables().users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self.tables().users.iter().find(|u| u.email == email).cloned())
    }

    async fn set_current_business(&self, user_id: Uuid, business_id: Option<Uuid>) -> StoreResult<()> {
        let mut tables = self.tables();
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound)?;
        user.current_business_id = business_id;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn create_business(&self, name: &str, slug: &str, owner_id: Uuid) -> StoreResult<Business> {
        let mut tables = self.tables();
        if tables.businesses.iter().any(|b| b.slug == slug) {
            return Err(StoreError::Conflict("business slug".into()));
        }
        let now = Utc::now();
        let business = Business {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            owner_id,
            created_at: now,
            updated_at: now,
        };
        tables.businesses.push(business.clone());
        Ok(business)
    }

    async fn find_business(&self, id: Uuid) -> StoreResult<Option<Business>> {
        Ok(self.tables().businesses.iter().find(|b| b.id == id).cloned())
    }

    async fn list_businesses(&self) -> StoreResult<Vec<Business>> {
        Ok(self.tables().businesses.clone())
    }

    async fn add_membership(&self, business_id: Uuid, user_id: Uuid, role: &str) -> StoreResult<Membership> {
        let mut tables = self.tables();
        if tables
            .memberships
            .iter()
            .any(|m| m.business_id == business_id && m.user_id == user_id)
        {
            return Err(StoreError::Conflict("membership".into()));
        }
        let membership = Membership {
            business_id,
            user_id,
            role: role.to_string(),
            joined_at: Utc::now(),
        };
        tables.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn find_membership(&self, business_id: Uuid, user_id: Uuid) -> StoreResult<Option<Membership>> {
        Ok(self
            .tables()
            .memberships
            .iter()
            .find(|m| m.business_id == business_id && m.user_id == user_id)
            .cloned())
    }

    async fn remove_membership(&self, business_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables();
        let before = tables.memberships.len();
        tables
            .memberships
            .retain(|m| !(m.business_id == business_id && m.user_id == user_id));
        if tables.memberships.len() == before {
            return Err(StoreError::NotFound);
        }
        for user in tables.users.iter_mut().filter(|u| u.id == user_id) {
            if user.current_business_id == Some(business_id) {
                user.current_business_id = None;
            }
        }
        Ok(())
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        Ok(self
            .tables()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn memberships_for_business(&self, business_id: Uuid) -> StoreResult<Vec<Membership>> {
        Ok(self
            .tables()
            .memberships
            .iter()
            .filter(|m| m.business_id == business_id)
            .cloned()
            .collect())
    }

    async fn count_team_members(&self, business_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .tables()
            .memberships
            .iter()
            .filter(|m| m.business_id == business_id && m.role != "owner")
            .count() as i64)
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()> {
        let mut tables = self.tables();
        if !tables.plans.iter().any(|p| p.slug == plan.slug) {
            tables.plans.push(plan.clone());
        }
        Ok(())
    }

    async fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .tables()
            .plans
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.sort_order);
        Ok(plans)
    }

    async fn find_plan(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        Ok(self.tables().plans.iter().find(|p| p.id == id).cloned())
    }

    async fn find_plan_by_slug(&self, slug: &str) -> StoreResult<Option<Plan>> {
        Ok(self.tables().plans.iter().find(|p| p.slug == slug).cloned())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<Subscription> {
        self.tables().subscriptions.push(subscription.clone());
        Ok(subscription.clone())
    }

    async fn subscriptions_for(&self, business_id: Uuid) -> StoreResult<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .tables()
            .subscriptions
            .iter()
            .filter(|s| s.business_id == business_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(subs)
    }

    async fn set_subscription_status(&self, id: Uuid, status: &str) -> StoreResult<()> {
        let mut tables = self.tables();
        if let Some(sub) = tables.subscriptions.iter_mut().find(|s| s.id == id) {
            sub.status = status.to_string();
            sub.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables();
        let mut expired = 0;
        for sub in tables.subscriptions.iter_mut() {
            let running = matches!(
                sub.status(),
                Some(SubscriptionStatus::Active | SubscriptionStatus::Trialing)
            );
            if running && !sub.is_active_at(now) {
                sub.status = SubscriptionStatus::Expired.as_str().to_string();
                sub.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn count_leads_created_since(&self, business_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64> {
        let mut tables = self.tables();
        Ok(tables
            .rows::<Lead>()
            .iter()
            .filter(|l| l.business_id == business_id && l.created_at >= since && l.deleted_at.is_none())
            .count() as i64)
    }

    async fn find_lead_by_conversation(
        &self,
        scope: &TenantScope,
        conversation_id: Uuid,
    ) -> StoreResult<Option<Lead>> {
        let mut tables = self.tables();
        Ok(tables
            .rows::<Lead>()
            .iter()
            .find(|l| {
                l.instagram_conversation_id == Some(conversation_id)
                    && visible(*l, scope, Trashed::Exclude)
            })
            .cloned())
    }

    async fn insert_lead_once(&self, scope: &TenantScope, lead: Lead) -> StoreResult<(Lead, bool)> {
        let lead = stamp_row(scope, lead)?;
        let mut tables = self.tables();
        let rows = tables.rows::<Lead>();
        if let Some(conversation_id) = lead.instagram_conversation_id {
            if let Some(existing) = rows
                .iter()
                .find(|l| l.instagram_conversation_id == Some(conversation_id))
            {
                if !scope.admits(existing.business_id) {
                    return Err(StoreError::NotFound);
                }
                return Ok((existing.clone(), false));
            }
        }
        rows.push(lead.clone());
        Ok((lead, true))
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn analyzed_seconds_since(&self, business_id: Uuid, since: DateTime<Utc>) -> StoreResult<i64> {
        let mut tables = self.tables();
        Ok(tables
            .rows::<CallLog>()
            .iter()
            .filter(|c| {
                c.business_id == business_id
                    && c.created_at >= since
                    && c.deleted_at.is_none()
                    && c.analysis().consumes_minutes()
            })
            .map(|c| i64::from(c.duration))
            .sum())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_account_by_instagram_id(&self, instagram_id: &str) -> StoreResult<Option<InstagramAccount>> {
        let mut tables = self.tables();
        Ok(tables
            .rows::<InstagramAccount>()
            .iter()
            .find(|a| a.instagram_id == instagram_id && a.is_active && a.deleted_at.is_none())
            .cloned())
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
        let mut tables = self.tables();
        let rows = tables.rows::<InstagramConversation>();
        if let Some(existing) = rows
            .iter_mut()
            .find(|c| c.account_id == account.id && c.participant_id == participant_id)
        {
            if let Some(username) = participant_username {
                existing.participant_username = Some(username.to_string());
            }
            existing.deleted_at = None;
            return Ok(existing.clone());
        }
        let mut conversation = InstagramConversation::new(account.business_id, account.id, participant_id);
        conversation.participant_username = participant_username.map(String::from);
        rows.push(conversation.clone());
        Ok(conversation)
    }

    async fn record_message_once(
        &self,
        _conversation: &InstagramConversation,
        message_id: &str,
        _text: &str,
    ) -> StoreResult<bool> {
        Ok(self.tables().message_ids.insert(message_id.to_string()))
    }

    async fn forget_message(&self, message_id: &str) -> StoreResult<()> {
        self.tables().message_ids.remove(message_id);
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
