use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    db::{Repository, Trashed},
    error::AppError,
    middleware::tenant::TenantContext,
    models::{
        auth::AuthenticatedUser,
        instagram::{ConnectAccountRequest, ConversationStatus, InstagramAccount, InstagramConversation},
    },
    services::{
        access::{authorize, Permission},
        chatbot::ChatbotService,
        intent::{IntentMatcher, IntentResult},
        tickets::{LeadOutcome, LeadStats, StatsPeriod, TicketService},
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
}

/// Preview of what the bot would do with a message.
pub async fn classify(_user: AuthenticatedUser, Json(body): Json<ClassifyRequest>) -> Json<IntentResult> {
    Json(IntentMatcher::classify(&body.text))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub period: StatsPeriod,
}

pub async fn lead_stats(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<StatsQuery>,
) -> Result<Json<LeadStats>, AppError> {
    authorize(&ctx, Permission::LeadsRead)?;
    let stats = TicketService::lead_stats(state.store.as_ref(), &ctx.scope(), query.period).await?;
    Ok(Json(stats))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<InstagramAccount>>, AppError> {
    authorize(&ctx, Permission::ChatbotManage)?;
    let accounts =
        Repository::<InstagramAccount>::list(state.store.as_ref(), &ctx.scope(), Trashed::Exclude).await?;
    Ok(Json(accounts))
}

pub async fn connect_account(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<ConnectAccountRequest>,
) -> Result<(StatusCode, Json<InstagramAccount>), AppError> {
    authorize(&ctx, Permission::ChatbotManage)?;
    let business_id = ctx.require_business()?;
    let account = ChatbotService::connect_account(state.store.as_ref(), business_id, body).await?;
    tracing::info!("Instagram account @{} connected to business {}", account.username, business_id);
    Ok((StatusCode::CREATED, Json(account)))
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub status: Option<ConversationStatus>,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<InstagramConversation>>, AppError> {
    authorize(&ctx, Permission::ChatbotManage)?;
    let conversations =
        ChatbotService::list_conversations(state.store.as_ref(), &ctx.scope(), query.status).await?;
    Ok(Json(conversations))
}

pub async fn assign_conversation(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<InstagramConversation>, AppError> {
    authorize(&ctx, Permission::ChatbotManage)?;
    let conversation = ChatbotService::assign(state.store.as_ref(), &ctx.scope(), id, ctx.user.id).await?;
    Ok(Json(conversation))
}

pub async fn close_conversation(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<Json<InstagramConversation>, AppError> {
    authorize(&ctx, Permission::ChatbotManage)?;
    let conversation = ChatbotService::close(state.store.as_ref(), &ctx.scope(), id).await?;
    Ok(Json(conversation))
}

pub async fn create_conversation_lead(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    authorize(&ctx, Permission::LeadsWrite)?;
    let outcome = ChatbotService::force_lead(state.store.as_ref(), &ctx.scope(), id).await?;
    let status = match outcome {
        LeadOutcome::Created(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(json!({ "outcome": outcome.as_str(), "lead": outcome.lead() }))))
}
