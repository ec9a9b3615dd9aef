use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Stable error codes surfaced on the wire. Never structured types, per the
/// service's error contract: clients match on `error.code`, not on variant
/// shape.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication required")]
    AuthRequired,
    #[error("invalid credential")]
    AuthInvalid,
    #[error("access denied")]
    AccessDenied,
    #[error("forbidden")]
    Forbidden,
    #[error("graph not found")]
    GraphNotFound,
    #[error("task not found")]
    TaskNotFound,
    #[error("cursor not found")]
    CursorNotFound,
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("invalid activity type: {0}")]
    InvalidActivityType(String),
    #[error("blocked status requires a reason")]
    MissingBlockedReason,
    #[error("task already claimed")]
    AlreadyClaimed,
    #[error("agent or task not found")]
    AgentOrTaskNotFound,
    #[error("already a member")]
    AlreadyMember { role: String },
    #[error("epic id conflict")]
    EpicIdConflict,
    #[error("graph store unavailable")]
    ServiceUnavailable,
    #[error("AI service not configured")]
    AiServiceNotConfigured,
    #[error("AI service error: {0}")]
    AiServiceError(String),
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "auth_required",
            AppError::AuthInvalid => "auth_invalid",
            AppError::AccessDenied => "access_denied",
            AppError::Forbidden => "forbidden",
            AppError::GraphNotFound => "graph_not_found",
            AppError::TaskNotFound => "task_not_found",
            AppError::CursorNotFound => "cursor_not_found",
            AppError::InvitationNotFound => "invitation_not_found",
            AppError::MissingField(_) => "missing_field",
            AppError::InvalidStatus(_) => "invalid_status",
            AppError::InvalidActivityType(_) => "invalid_activity_type",
            AppError::MissingBlockedReason => "missing_blocked_reason",
            AppError::AlreadyClaimed => "already_claimed",
            AppError::AgentOrTaskNotFound => "agent_or_task_not_found",
            AppError::AlreadyMember { .. } => "already_member",
            AppError::EpicIdConflict => "epic_id_conflict",
            AppError::ServiceUnavailable => "service_unavailable",
            AppError::AiServiceNotConfigured => "ai_service_not_configured",
            AppError::AiServiceError(_) => "ai_service_error",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthRequired | AppError::AuthInvalid => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::GraphNotFound
            | AppError::TaskNotFound
            | AppError::CursorNotFound
            | AppError::InvitationNotFound
            | AppError::AgentOrTaskNotFound => StatusCode::NOT_FOUND,
            AppError::MissingField(_)
            | AppError::InvalidStatus(_)
            | AppError::InvalidActivityType(_)
            | AppError::MissingBlockedReason
            | AppError::InvalidSignature => StatusCode::BAD_REQUEST,
            AppError::AlreadyClaimed | AppError::AlreadyMember { .. } | AppError::EpicIdConflict => {
                StatusCode::CONFLICT
            }
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AiServiceNotConfigured | AppError::AiServiceError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::AlreadyMember { role } => Some(json!({ "role": role })),
            AppError::MissingField(field) => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str, details: Option<Value>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
                details,
                request_id: Uuid::new_v4().to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        } else {
            tracing::warn!(code = self.code(), error = %self, "request failed");
        }

        let body = ErrorResponse::new(self.code(), &self.to_string(), self.details());
        (self.status(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(AppError::AuthRequired.code(), "auth_required");
        assert_eq!(AppError::AlreadyClaimed.code(), "already_claimed");
        assert_eq!(AppError::TaskNotFound.code(), "task_not_found");
    }

    #[test]
    fn status_mapping_matches_spec() {
        assert_eq!(AppError::AuthRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccessDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::GraphNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::AlreadyClaimed.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::ServiceUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
