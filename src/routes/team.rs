use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::tenant::TenantContext,
    models::{
        business::{AddTeamMemberRequest, Role, TeamMember},
        plan::Resource,
    },
    services::{
        access::{authorize, Permission},
        limits::PlanGate,
    },
    AppState,
};

pub async fn list_team(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<TeamMember>>, AppError> {
    let business_id = ctx.require_business()?;
    let mut members = Vec::new();
    for membership in state.store.memberships_for_business(business_id).await? {
        if let Some(user) = state.store.find_user(membership.user_id).await? {
            members.push(TeamMember {
                user_id: user.id,
                name: user.name,
                email: user.email,
                role: membership.role(),
                joined_at: membership.joined_at,
            });
        }
    }
    Ok(Json(members))
}

/// Adds an existing user to the business. Counts against `team_members`.
pub async fn add_member(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<AddTeamMemberRequest>,
) -> Result<(StatusCode, Json<TeamMember>), AppError> {
    authorize(&ctx, Permission::TeamManage)?;
    let business_id = ctx.require_business()?;

    if body.role == Role::Owner {
        return Err(AppError::validation("A business has exactly one owner"));
    }
    let user = state
        .store
        .find_user_by_email(body.email.trim().to_lowercase().as_str())
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    if state.store.find_membership(business_id, user.id).await?.is_some() {
        return Err(AppError::Conflict("User is already a team member".into()));
    }

    PlanGate::check_quota(state.store.as_ref(), business_id, Resource::TeamMembers, 1).await?;

    let membership = state
        .store
        .add_membership(business_id, user.id, &body.role.to_string())
        .await?;
    if user.current_business_id.is_none() {
        state.store.set_current_business(user.id, Some(business_id)).await?;
    }
    tracing::info!("User {} joined business {} as {}", user.id, business_id, body.role);

    Ok((
        StatusCode::CREATED,
        Json(TeamMember {
            user_id: user.id,
            name: user.name,
            email: user.email,
            role: membership.role(),
            joined_at: membership.joined_at,
        }),
    ))
}

pub async fn remove_member(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    authorize(&ctx, Permission::TeamManage)?;
    let business_id = ctx.require_business()?;

    let membership = state
        .store
        .find_membership(business_id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Team member"))?;
    if membership.role() == Role::Owner {
        return Err(AppError::Forbidden("The owner cannot be removed".into()));
    }

    state.store.remove_membership(business_id, user_id).await?;
    if let Some(user) = state.store.find_user(user_id).await? {
        if user.current_business_id == Some(business_id) {
            state.store.set_current_business(user_id, None).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
