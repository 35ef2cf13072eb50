use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{db::TenantScope, error::AppError, AppState};

/// Extractor that validates the `X-Super-Admin-Key` header against `config.super_admin_key`.
pub struct SuperAdminAuth;

impl SuperAdminAuth {
    /// Cross-tenant scope for platform reporting.
    pub fn scope(&self) -> TenantScope {
        TenantScope::all_tenants()
    }
}

impl FromRequestParts<AppState> for SuperAdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("X-Super-Admin-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthenticated("Missing X-Super-Admin-Key header".into()))?;

        if key != state.config.super_admin_key {
            return Err(AppError::Unauthenticated("Invalid super-admin key".into()));
        }

        Ok(SuperAdminAuth)
    }
}
