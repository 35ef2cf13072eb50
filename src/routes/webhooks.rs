use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppError,
    models::instagram::{VerifyQuery, WebhookPayload},
    services::chatbot::{ChatbotService, WebhookSummary},
    AppState,
};

/// Subscription handshake for `GET /webhooks/instagram`.
pub async fn verify(State(state): State<AppState>, Query(query): Query<VerifyQuery>) -> Result<String, AppError> {
    let expected = state
        .config
        .instagram_verify_token
        .as_deref()
        .ok_or_else(|| AppError::Forbidden("Webhook verification is not configured".into()))?;

    match (query.mode.as_deref(), query.verify_token.as_deref(), query.challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected => {
            tracing::info!("Instagram webhook verified");
            Ok(challenge)
        }
        _ => Err(AppError::Forbidden("Webhook verification failed".into())),
    }
}

/// Inbound DM events. Answers 503 when any event failed so Instagram
/// redelivers the batch; events that went through count as duplicates then.
pub async fn receive(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<(StatusCode, Json<WebhookSummary>), AppError> {
    let summary = ChatbotService::handle_webhook(&state, payload).await?;
    let status = if summary.failed > 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    Ok((status, Json(summary)))
}
