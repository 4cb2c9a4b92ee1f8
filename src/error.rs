use crate::models::{AccountRole, ApprovalStatus};
use crate::repositories::RepositoryError;
use crate::services::{
    AccountServiceError, ApprovalError, ApprovalOutcome, AuthTokenError, ConsentError,
    InviteError, PlanError, TokenError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors as the HTTP layer reports them.
#[derive(Error, Debug)]
pub enum AppError {
    /// Every unusable link looks the same to the caller; the precise reason
    /// is only logged.
    #[error("Invalid or expired link ({reason})")]
    InvalidLink { reason: &'static str },

    #[error("Approval already {status}")]
    ApprovalAlreadyProcessed {
        status: ApprovalStatus,
        outcome: Option<ApprovalOutcome>,
    },

    #[error("Account role {0} cannot do this")]
    IncompatibleRole(AccountRole),

    #[error("Plan is full")]
    CapacityExceeded {
        slots_remaining: i64,
        max_members: i64,
        current_members: i64,
    },

    #[error("A pending approval already exists for this child")]
    DuplicatePendingApproval,

    #[error("Red Alert agreement must be accepted")]
    ConsentNotAccepted,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Database(e) => AppError::Database(e),
            other => AppError::InvalidLink {
                reason: other.reason(),
            },
        }
    }
}

impl From<ApprovalError> for AppError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::TokenNotFound => AppError::InvalidLink {
                reason: "not_found",
            },
            ApprovalError::TokenAlreadyUsed => AppError::InvalidLink {
                reason: "already_used",
            },
            ApprovalError::TokenExpired => AppError::InvalidLink { reason: "expired" },
            ApprovalError::ApprovalAlreadyProcessed { status, outcome } => {
                AppError::ApprovalAlreadyProcessed { status, outcome }
            }
            ApprovalError::IncompatibleRole(role) => AppError::IncompatibleRole(role),
            ApprovalError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            } => AppError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            },
            ApprovalError::DuplicatePendingApproval => AppError::DuplicatePendingApproval,
            ApprovalError::ConsentNotAccepted => AppError::ConsentNotAccepted,
            ApprovalError::NotAuthorized => AppError::NotAuthorized,
            ApprovalError::ApprovalNotFound => AppError::NotFound("Approval"),
            ApprovalError::PlanNotFound => AppError::NotFound("Plan"),
            ApprovalError::Validation(msg) => AppError::Validation(msg),
            ApprovalError::Database(e) => AppError::Database(e),
            ApprovalError::Repository(e) => e.into(),
            ApprovalError::Account(e) => e.into(),
            ApprovalError::Plan(e) => e.into(),
        }
    }
}

impl From<PlanError> for AppError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::PlanNotFound => AppError::NotFound("Plan"),
            PlanError::MembershipNotFound => AppError::NotFound("Membership"),
            PlanError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            } => AppError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            },
            PlanError::PlanAlreadyExists => {
                AppError::Conflict("account already owns a plan".to_string())
            }
            PlanError::InvalidCapacity(msg) => AppError::Validation(msg),
            PlanError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<ConsentError> for AppError {
    fn from(e: ConsentError) -> Self {
        match e {
            ConsentError::ConsentNotAccepted => AppError::ConsentNotAccepted,
            ConsentError::NotAuthorized => AppError::NotAuthorized,
            ConsentError::LinkNotFound => AppError::NotFound("Parent link"),
            ConsentError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<InviteError> for AppError {
    fn from(e: InviteError) -> Self {
        match e {
            InviteError::TokenNotFound => AppError::InvalidLink {
                reason: "not_found",
            },
            InviteError::TokenAlreadyUsed => AppError::InvalidLink {
                reason: "already_used",
            },
            InviteError::TokenExpired => AppError::InvalidLink { reason: "expired" },
            InviteError::NotAuthorized => AppError::NotAuthorized,
            InviteError::InviteNotFound => AppError::NotFound("Invite"),
            InviteError::Validation(msg) => AppError::Validation(msg),
            InviteError::Account(e) => e.into(),
            InviteError::Approval(e) => e.into(),
            InviteError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<AuthTokenError> for AppError {
    fn from(e: AuthTokenError) -> Self {
        match e {
            AuthTokenError::TokenNotFound => AppError::InvalidLink {
                reason: "not_found",
            },
            AuthTokenError::TokenAlreadyUsed => AppError::InvalidLink {
                reason: "already_used",
            },
            AuthTokenError::TokenExpired => AppError::InvalidLink { reason: "expired" },
            AuthTokenError::AccountNotFound => AppError::InvalidLink {
                reason: "account_inactive",
            },
            AuthTokenError::DatabaseError(e) => AppError::Database(e),
            AuthTokenError::RepositoryError(e) => e.into(),
        }
    }
}

impl From<AccountServiceError> for AppError {
    fn from(e: AccountServiceError) -> Self {
        match e {
            AccountServiceError::InvalidEmail => {
                AppError::Validation("invalid email address".to_string())
            }
            AccountServiceError::WeakPassword => {
                AppError::Validation("password must be at least 8 characters".to_string())
            }
            AccountServiceError::EmailTaken => {
                AppError::Conflict("email already registered".to_string())
            }
            AccountServiceError::IncompatibleRole(role) => AppError::IncompatibleRole(role),
            AccountServiceError::SignupRequired => AppError::Validation(
                "signup details are required for a new parent account".to_string(),
            ),
            AccountServiceError::AccountNotFound => AppError::NotFound("Account"),
            AccountServiceError::HashingError(msg) => AppError::InternalError(msg),
            AccountServiceError::RepositoryError(e) => e.into(),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::NotFound => AppError::NotFound("Record"),
            RepositoryError::AlreadyExists => {
                AppError::Conflict("record already exists".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InvalidLink { reason } => {
                tracing::warn!(reason, "rejected link");
                (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "error": "invalid_link",
                        "message": "This link is invalid or has expired",
                    }),
                )
            }
            AppError::ApprovalAlreadyProcessed { status, outcome } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "approval_already_processed",
                    "message": format!("This request was already {}", status),
                    "status": status,
                    "outcome": outcome,
                }),
            ),
            AppError::IncompatibleRole(role) => (
                StatusCode::CONFLICT,
                json!({
                    "error": "incompatible_role",
                    "message": format!("A {} account cannot do this", role),
                    "role": role,
                }),
            ),
            AppError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "capacity_exceeded",
                    "message": "The plan has no free seats",
                    "slots_remaining": slots_remaining,
                    "max_members": max_members,
                    "current_members": current_members,
                }),
            ),
            AppError::DuplicatePendingApproval => (
                StatusCode::CONFLICT,
                json!({
                    "error": "duplicate_pending_approval",
                    "message": "An approval request for this child is already waiting",
                }),
            ),
            AppError::ConsentNotAccepted => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": "consent_not_accepted",
                    "message": "The Red Alert agreement must be accepted",
                }),
            ),
            AppError::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "authentication_required",
                    "message": "Log in to continue",
                }),
            ),
            AppError::NotAuthorized => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "not_authorized",
                    "message": "You are not allowed to do this",
                }),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "not_found",
                    "message": format!("{} not found", what),
                }),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                json!({ "error": "conflict", "message": msg }),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation", "message": msg }),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                internal_error()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                internal_error()
            }
        };

        (status, Json(body)).into_response()
    }
}

fn internal_error() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({
            "error": "internal_error",
            "message": "Internal server error",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_failures_share_one_public_error() {
        for error in [TokenError::NotFound, TokenError::AlreadyUsed, TokenError::Expired] {
            let response = AppError::from(error).into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn capacity_error_is_a_conflict() {
        let response = AppError::from(PlanError::CapacityExceeded {
            slots_remaining: 0,
            max_members: 1,
            current_members: 1,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
