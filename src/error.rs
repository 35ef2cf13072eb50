use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::db::StoreError;
use crate::models::plan::{DowngradeIssue, LimitDecision};

/// Error returned by every API handler. Rendered as
/// `{ "success": false, "error_code": ..., "message": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    TenantMismatch(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{} reached. Upgrade your plan to continue.", .0.resource.label())]
    LimitExceeded(LimitDecision),
    #[error("{0} is not available on your plan")]
    FeatureNotAvailable(&'static str),
    #[error("No active subscription")]
    NoActiveSubscription,
    #[error("Current usage does not fit the selected plan")]
    DowngradeBlocked(Vec<DowngradeIssue>),
    #[error("{0}")]
    RateLimited(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_)
            | AppError::TenantMismatch(_)
            | AppError::LimitExceeded(_)
            | AppError::FeatureNotAvailable(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::DowngradeBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NoActiveSubscription => StatusCode::PAYMENT_REQUIRED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::TenantMismatch(_) => "TENANT_MISMATCH",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::LimitExceeded(_) => "FEATURE_LIMIT_EXCEEDED",
            AppError::FeatureNotAvailable(_) => "FEATURE_NOT_AVAILABLE",
            AppError::NoActiveSubscription => "NO_ACTIVE_SUBSCRIPTION",
            AppError::DowngradeBlocked(_) => "DOWNGRADE_BLOCKED",
            AppError::RateLimited(_) => "RATE_LIMITED",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("Record not found".into()),
            StoreError::NoTenant => AppError::Forbidden("No active business selected".into()),
            StoreError::Conflict(what) => AppError::Conflict(format!("{what} already exists")),
            StoreError::Database(e) => AppError::Internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "success": false,
            "error_code": self.code(),
            "message": message,
        });

        match &self {
            AppError::LimitExceeded(decision) => {
                extend(&mut body, json!({
                    "resource": decision.resource,
                    "used": decision.used,
                    "requested": decision.requested,
                    "limit": decision.limit,
                    "remaining": decision.remaining,
                    "upgrade_required": true,
                }));
            }
            AppError::DowngradeBlocked(issues) => {
                extend(&mut body, json!({ "issues": issues }));
            }
            AppError::FeatureNotAvailable(_) | AppError::NoActiveSubscription => {
                extend(&mut body, json!({ "upgrade_required": true }));
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

fn extend(body: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(source)) = (body, extra) {
        target.extend(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::Resource;

    #[test]
    fn limit_message_names_the_resource() {
        let err = AppError::LimitExceeded(LimitDecision {
            resource: Resource::TeamMembers,
            used: 1,
            requested: 1,
            limit: Some(1),
            remaining: Some(0),
            allowed: false,
        });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "FEATURE_LIMIT_EXCEEDED");
        assert!(err.to_string().contains("Team member limit"));
    }

    #[test]
    fn store_errors_map_to_api_errors() {
        assert_eq!(AppError::from(StoreError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(StoreError::NoTenant).code(), "FORBIDDEN");
        assert_eq!(AppError::from(StoreError::Conflict("email".into())).status(), StatusCode::CONFLICT);
    }
}
