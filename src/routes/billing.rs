use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    error::AppError,
    middleware::tenant::TenantContext,
    models::{
        auth::AuthenticatedUser,
        plan::{ChangePlanRequest, Plan, UsageStat},
    },
    services::{
        access::{authorize, Permission},
        limits::PlanGate,
        subscription::SubscriptionService,
    },
    AppState,
};

pub async fn list_plans(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Plan>>, AppError> {
    let plans = state.store.list_plans().await?;
    Ok(Json(plans.into_iter().filter(|p| p.is_active).collect()))
}

pub async fn current_subscription(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Value>, AppError> {
    let business_id = ctx.require_business()?;
    let (subscription, plan) =
        SubscriptionService::active_plan(state.store.as_ref(), business_id, Utc::now()).await?;
    Ok(Json(json!({ "subscription": subscription, "plan": plan })))
}

pub async fn usage(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<UsageStat>>, AppError> {
    let business_id = ctx.require_business()?;
    Ok(Json(PlanGate::usage_stats(state.store.as_ref(), business_id).await?))
}

pub async fn change_plan(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<ChangePlanRequest>,
) -> Result<Json<Value>, AppError> {
    authorize(&ctx, Permission::BillingManage)?;
    let business_id = ctx.require_business()?;
    let (subscription, plan) =
        SubscriptionService::change_plan(state.store.as_ref(), business_id, body.plan.trim()).await?;
    Ok(Json(json!({ "subscription": subscription, "plan": plan })))
}
