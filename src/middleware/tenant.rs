use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{
    db::TenantScope,
    error::AppError,
    models::{auth::AuthenticatedUser, business::Role, user::User},
    AppState,
};

pub const BUSINESS_HEADER: &str = "X-Business-Id";

/// The caller and the business the request acts on.
///
/// Resolved per request: the `X-Business-Id` header wins, otherwise the
/// user's `current_business_id`. The user must be a member of that business
/// unless they are a super-admin.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user: User,
    pub business_id: Option<Uuid>,
    pub role: Option<Role>,
}

impl TenantContext {
    pub fn scope(&self) -> TenantScope {
        match self.business_id {
            Some(id) => TenantScope::for_business(id),
            None => TenantScope::unresolved(),
        }
    }

    pub fn require_business(&self) -> Result<Uuid, AppError> {
        self.business_id
            .ok_or_else(|| AppError::Forbidden("No active business selected".into()))
    }
}

impl FromRequestParts<AppState> for TenantContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthenticatedUser::from_request_parts(parts, state).await?;

        let user = state
            .store
            .find_user(auth.user_id)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("User no longer exists".into()))?;

        let requested = match parts.headers.get(BUSINESS_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<Uuid>().ok())
                    .ok_or_else(|| AppError::validation("Invalid X-Business-Id header"))?,
            ),
            None => user.current_business_id,
        };

        let Some(business_id) = requested else {
            return Ok(TenantContext { user, business_id: None, role: None });
        };

        match state.store.find_membership(business_id, user.id).await? {
            Some(membership) => Ok(TenantContext {
                role: Some(membership.role()),
                user,
                business_id: Some(business_id),
            }),
            None if user.is_super_admin => {
                if state.store.find_business(business_id).await?.is_none() {
                    return Err(AppError::not_found("Business"));
                }
                Ok(TenantContext { user, business_id: Some(business_id), role: None })
            }
            None => {
                tracing::warn!(
                    "Tenant mismatch: user {} requested business {}",
                    user.id,
                    business_id
                );
                Err(AppError::TenantMismatch(
                    "You do not have access to this business".into(),
                ))
            }
        }
    }
}
