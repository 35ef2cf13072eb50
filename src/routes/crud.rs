//! Generic scoped CRUD handlers for the tenant-owned CRM entities.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::{Repository, Store, Trashed},
    error::AppError,
    middleware::tenant::TenantContext,
    services::{access::authorize, limits::PlanGate, records::CrudEntity},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct TrashedQuery {
    #[serde(default)]
    pub trashed: Trashed,
}

/// list/create on `path`, show/update/delete on `path/{id}`, restore on
/// `path/{id}/restore`.
pub fn resource<E>(path: &str) -> Router<AppState>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    Router::new()
        .route(path, get(list::<E>).post(create::<E>))
        .route(
            &format!("{path}/{{id}}"),
            get(show::<E>).put(update::<E>).delete(remove::<E>),
        )
        .route(&format!("{path}/{{id}}/restore"), post(restore::<E>))
}

fn authorize_read<E: CrudEntity>(ctx: &TenantContext) -> Result<(), AppError> {
    match E::READ {
        Some(permission) => authorize(ctx, permission),
        None => ctx.require_business().map(|_| ()),
    }
}

pub async fn list<E>(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<TrashedQuery>,
) -> Result<Json<Vec<E>>, AppError>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    authorize_read::<E>(&ctx)?;
    let rows = Repository::<E>::list(state.store.as_ref(), &ctx.scope(), query.trashed).await?;
    Ok(Json(rows))
}

pub async fn show<E>(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Query(query): Query<TrashedQuery>,
) -> Result<Json<E>, AppError>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    authorize_read::<E>(&ctx)?;
    Repository::<E>::find(state.store.as_ref(), &ctx.scope(), id, query.trashed)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(E::NAME))
}

pub async fn create<E>(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<E::Create>,
) -> Result<(StatusCode, Json<E>), AppError>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    authorize(&ctx, E::WRITE)?;
    let business_id = ctx.require_business()?;
    let row = E::from_create(body)?;

    if let Some(resource) = E::QUOTA {
        PlanGate::check_quota(state.store.as_ref(), business_id, resource, 1).await?;
    }

    let row = Repository::<E>::insert(state.store.as_ref(), &ctx.scope(), row).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update<E>(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<E::Update>,
) -> Result<Json<E>, AppError>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    authorize(&ctx, E::WRITE)?;
    let scope = ctx.scope();
    let mut row = Repository::<E>::find(state.store.as_ref(), &scope, id, Trashed::Exclude)
        .await?
        .ok_or_else(|| AppError::not_found(E::NAME))?;
    row.apply_update(body)?;
    row.set_updated_at(Utc::now());
    Ok(Json(Repository::<E>::update(state.store.as_ref(), &scope, row).await?))
}

pub async fn remove<E>(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    authorize(&ctx, E::WRITE)?;
    Repository::<E>::soft_delete(state.store.as_ref(), &ctx.scope(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore<E>(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<E>, AppError>
where
    E: CrudEntity,
    dyn Store: Repository<E>,
{
    authorize(&ctx, E::WRITE)?;
    Ok(Json(Repository::<E>::restore(state.store.as_ref(), &ctx.scope(), id).await?))
}
