use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    db::Repository,
    error::AppError,
    middleware::super_admin::SuperAdminAuth,
    models::{business::Business, lead::Lead},
    routes::crud::TrashedQuery,
    AppState,
};

/// Leads of every business, for platform reporting.
pub async fn list_all_leads(
    State(state): State<AppState>,
    admin: SuperAdminAuth,
    Query(query): Query<TrashedQuery>,
) -> Result<Json<Vec<Lead>>, AppError> {
    let leads = Repository::<Lead>::list(state.store.as_ref(), &admin.scope(), query.trashed).await?;
    Ok(Json(leads))
}

pub async fn list_all_businesses(
    State(state): State<AppState>,
    _admin: SuperAdminAuth,
) -> Result<Json<Vec<Business>>, AppError> {
    Ok(Json(state.store.list_businesses().await?))
}
