use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    error::AppError,
    middleware::rate_limit::check_rate_limit,
    models::{
        auth::AuthenticatedUser,
        user::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UserProfile},
    },
    services::{auth::AuthService, metrics::LOGINS_COUNTER},
    AppState,
};

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let resp = AuthService::register(state.store.as_ref(), &state.config, &body).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = body.email.trim().to_lowercase();
    let rate_key = format!("rate:login:{email}");
    check_rate_limit(state.cache.as_ref(), &rate_key, 5, 60).await?;

    match AuthService::login(state.store.as_ref(), &state.config, &email, &body.password).await {
        Ok(resp) => {
            LOGINS_COUNTER.with_label_values(&["success"]).inc();
            Ok(Json(resp))
        }
        Err(e) => {
            LOGINS_COUNTER.with_label_values(&["failure"]).inc();
            Err(e)
        }
    }
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> Result<Json<Value>, AppError> {
    let user = state
        .store
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let role = match user.current_business_id {
        Some(business_id) => state
            .store
            .find_membership(business_id, user.id)
            .await?
            .map(|m| m.role()),
        None => None,
    };

    Ok(Json(json!({
        "user": UserProfile::from(user),
        "role": role,
    })))
}
