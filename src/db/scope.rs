use uuid::Uuid;

use super::StoreError;

/// Which tenant's rows a repository call may see or write.
///
/// Built per request from the resolved `TenantContext` and passed to every
/// repository method; there is no ambient "current business".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    /// Only rows owned by this business.
    Business(Uuid),
    /// Cross-tenant access for super-admin reporting and background jobs.
    AllTenants,
    /// No active business. Reads are empty and writes are refused.
    Unresolved,
}

impl TenantScope {
    pub fn for_business(business_id: Uuid) -> Self {
        TenantScope::Business(business_id)
    }

    pub fn all_tenants() -> Self {
        TenantScope::AllTenants
    }

    pub fn unresolved() -> Self {
        TenantScope::Unresolved
    }

    pub fn business_id(&self) -> Option<Uuid> {
        match self {
            TenantScope::Business(id) => Some(*id),
            _ => None,
        }
    }

    /// True when a row owned by `business_id` is visible under this scope.
    pub fn admits(&self, business_id: Uuid) -> bool {
        match self {
            TenantScope::Business(id) => *id == business_id,
            TenantScope::AllTenants => true,
            TenantScope::Unresolved => false,
        }
    }

    /// SQL predicate restricting `business_id`. When it references a
    /// placeholder, the caller binds `business_id()` at position `param`.
    pub fn filter_clause(&self, param: usize) -> String {
        match self {
            TenantScope::Business(_) => format!("business_id = ${param}"),
            TenantScope::AllTenants => "TRUE".to_string(),
            TenantScope::Unresolved => "FALSE".to_string(),
        }
    }

    /// Business id to persist on a new row.
    ///
    /// Under a business scope the row is always stamped with that business,
    /// whatever the caller supplied. Only `AllTenants` honours an explicit id.
    pub fn stamp(&self, requested: Option<Uuid>) -> Result<Uuid, StoreError> {
        match (self, requested) {
            (TenantScope::Business(id), _) => Ok(*id),
            (TenantScope::AllTenants, Some(id)) => Ok(id),
            (TenantScope::AllTenants, None) | (TenantScope::Unresolved, _) => {
                Err(StoreError::NoTenant)
            }
        }
    }
}
