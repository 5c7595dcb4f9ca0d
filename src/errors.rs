use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::ReservationStatus;

/// The reschedule rule a request broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    AdvanceNotice,
    TooFrequent,
    NotReschedulable,
    Unchanged,
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyRule::AdvanceNotice => "advance_notice",
            PolicyRule::TooFrequent => "too_frequent",
            PolicyRule::NotReschedulable => "not_reschedulable",
            PolicyRule::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("invalid state transition: cannot {event} a reservation that is {from} ({detail})")]
    InvalidStateTransition {
        from: ReservationStatus,
        event: &'static str,
        detail: String,
    },

    #[error("reschedule policy violation ({rule}): {detail}")]
    ReschedulePolicyViolation { rule: PolicyRule, detail: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn slot_unavailable(msg: impl Into<String>) -> Self {
        AppError::SlotUnavailable(msg.into())
    }

    pub fn policy(rule: PolicyRule, detail: impl Into<String>) -> Self {
        AppError::ReschedulePolicyViolation {
            rule,
            detail: detail.into(),
        }
    }

    pub fn invalid_transition(
        from: ReservationStatus,
        event: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        AppError::InvalidStateTransition {
            from,
            event,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable name for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::SlotUnavailable(_) => "slot_unavailable",
            AppError::InvalidStateTransition { .. } => "invalid_state_transition",
            AppError::ReschedulePolicyViolation { .. } => "reschedule_policy_violation",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::SlotUnavailable(_) => StatusCode::CONFLICT,
            AppError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            AppError::ReschedulePolicyViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        if let AppError::ReschedulePolicyViolation { rule, .. } = &self {
            body["rule"] = serde_json::json!(rule);
        }
        (status, axum::Json(body)).into_response()
    }
}

