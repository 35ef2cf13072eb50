use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    db::{Repository, Trashed},
    error::AppError,
    middleware::tenant::TenantContext,
    models::call::{BulkAnalyzeRequest, CallLog, CreateCallRequest},
    services::{
        access::{authorize, Permission},
        calls::{BulkAnalyzeReport, CallService},
    },
    AppState,
};

pub async fn list_calls(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<CallLog>>, AppError> {
    authorize(&ctx, Permission::LeadsRead)?;
    let mut calls = Repository::<CallLog>::list(state.store.as_ref(), &ctx.scope(), Trashed::Exclude).await?;
    calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(calls))
}

pub async fn get_call(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<CallLog>, AppError> {
    authorize(&ctx, Permission::LeadsRead)?;
    Repository::<CallLog>::find(state.store.as_ref(), &ctx.scope(), id, Trashed::Exclude)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Call"))
}

pub async fn create_call(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<CreateCallRequest>,
) -> Result<(StatusCode, Json<CallLog>), AppError> {
    authorize(&ctx, Permission::CallsAnalyze)?;
    let call = CallService::create(state.store.as_ref(), &ctx.scope(), body).await?;
    Ok((StatusCode::CREATED, Json(call)))
}

pub async fn analyze_call(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<CallLog>), AppError> {
    authorize(&ctx, Permission::CallsAnalyze)?;
    let business_id = ctx.require_business()?;
    let call = CallService::analyze(state.store.as_ref(), &state.analysis, business_id, id).await?;
    Ok((StatusCode::ACCEPTED, Json(call)))
}

pub async fn analyze_bulk(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<BulkAnalyzeRequest>,
) -> Result<(StatusCode, Json<BulkAnalyzeReport>), AppError> {
    authorize(&ctx, Permission::CallsAnalyze)?;
    let business_id = ctx.require_business()?;
    let report = CallService::analyze_bulk(
        state.store.as_ref(),
        &state.analysis,
        business_id,
        &body.call_ids,
        state.config.bulk_analyze_max,
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}
