use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        auth::AuthenticatedUser,
        business::{Business, CreateBusinessRequest, Role},
        user::BusinessSummary,
    },
    services::auth::AuthService,
    AppState,
};

/// Businesses the caller is a member of.
pub async fn list_businesses(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<BusinessSummary>>, AppError> {
    let user = state
        .store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("User no longer exists".into()))?;

    let mut summaries = Vec::new();
    for membership in state.store.memberships_for_user(user.id).await? {
        if let Some(business) = state.store.find_business(membership.business_id).await? {
            summaries.push(BusinessSummary {
                is_current: user.current_business_id == Some(business.id),
                role: membership.role(),
                id: business.id,
                name: business.name,
                slug: business.slug,
            });
        }
    }
    Ok(Json(summaries))
}

pub async fn create_business(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<CreateBusinessRequest>,
) -> Result<(StatusCode, Json<Business>), AppError> {
    let user = state
        .store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("User no longer exists".into()))?;

    let business =
        AuthService::create_business_for(state.store.as_ref(), &state.config, &user, body.name.trim()).await?;
    tracing::info!("User {} created business {}", user.id, business.id);
    Ok((StatusCode::CREATED, Json(business)))
}

/// Makes `id` the caller's current business. The token stays valid; the next
/// request resolves the new tenant.
pub async fn switch_business(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<BusinessSummary>, AppError> {
    let business = state
        .store
        .find_business(id)
        .await?
        .ok_or_else(|| AppError::not_found("Business"))?;

    let role = match state.store.find_membership(id, auth.user_id).await? {
        Some(membership) => membership.role(),
        None if auth.is_super_admin => Role::Admin,
        None => {
            return Err(AppError::TenantMismatch(
                "You do not have access to this business".into(),
            ))
        }
    };

    state.store.set_current_business(auth.user_id, Some(id)).await?;
    tracing::info!("User {} switched to business {}", auth.user_id, id);

    Ok(Json(BusinessSummary {
        id: business.id,
        name: business.name,
        slug: business.slug,
        role,
        is_current: true,
    }))
}
