use crate::config::session::{read_session, store_session};
use crate::error::{AppError, Result};
use crate::handlers::client_metadata;
use crate::models::{ApprovalStatus, ChildProfile, ConsentInput, ParentApproval, Session};
use crate::services::{
    ApprovalOutcome, ApproveRequest, CreateApprovalRequest, ParentResolution, ParentSignup,
};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreateApprovalBody {
    child_first_name: String,
    child_last_name: String,
    child_birthdate: NaiveDate,
    parent_email: String,
}

#[derive(Deserialize)]
pub struct ApproveBody {
    token: String,
    #[serde(default)]
    red_alert_accepted: bool,
    #[serde(default)]
    silent_monitoring_enabled: bool,
    signup: Option<ParentSignup>,
}

#[derive(Deserialize)]
pub struct DeclineBody {
    token: String,
}

/// What a link holder may see about an approval.
#[derive(Debug, Serialize)]
pub struct ApprovalSummary {
    approval_id: i64,
    status: ApprovalStatus,
    child_first_name: String,
    child_last_name: String,
    parent_email: String,
    expires_at: i64,
}

impl From<ParentApproval> for ApprovalSummary {
    fn from(approval: ParentApproval) -> Self {
        Self {
            approval_id: approval.id,
            status: approval.status,
            child_first_name: approval.child_first_name,
            child_last_name: approval.child_last_name,
            parent_email: approval.parent_email,
            expires_at: approval.expires_at,
        }
    }
}

#[derive(Serialize)]
pub struct CreatedApprovalResponse {
    #[serde(flatten)]
    approval: ApprovalSummary,
    email_delivered: bool,
}

pub async fn create_approval_handler(
    State(app_state): State<AppState>,
    Json(body): Json<CreateApprovalBody>,
) -> Result<(StatusCode, Json<CreatedApprovalResponse>)> {
    let child = ChildProfile {
        first_name: body.child_first_name,
        last_name: body.child_last_name,
        birthdate: body.child_birthdate,
    };

    let created = app_state
        .approval_service
        .create_approval(CreateApprovalRequest::direct_signup(
            child,
            body.parent_email,
        ))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedApprovalResponse {
            approval: created.approval.into(),
            email_delivered: created.email_delivered,
        }),
    ))
}

pub async fn approval_status_handler(
    State(app_state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApprovalSummary>> {
    let approval = app_state
        .approval_service
        .get_approval_by_token(&token)
        .await?;
    Ok(Json(approval.into()))
}

/// Approves with the emailed link. A logged-in parent approves as
/// themselves; otherwise the body's signup details are used and the parent
/// is logged in afterwards.
pub async fn approve_handler(
    State(app_state): State<AppState>,
    cookie_session: tower_sessions::Session,
    headers: HeaderMap,
    Json(body): Json<ApproveBody>,
) -> Result<Json<ApprovalOutcome>> {
    let (ip_address, user_agent) = client_metadata(&headers);
    let consent = ConsentInput {
        red_alert_accepted: body.red_alert_accepted,
        silent_monitoring_enabled: body.silent_monitoring_enabled,
        ip_address,
        user_agent,
    };

    let existing = read_session(&cookie_session)
        .await
        .filter(|session| session.is_active_at(app_state.clock.now()));
    let resolution = match (existing, body.signup) {
        (Some(session), _) => ParentResolution::Existing(session),
        (None, Some(signup)) => ParentResolution::Signup(signup),
        (None, None) => {
            return Err(AppError::Validation(
                "log in or provide signup details to approve".to_string(),
            ))
        }
    };
    let logged_in = matches!(resolution, ParentResolution::Existing(_));

    let outcome = app_state
        .approval_service
        .approve_with_token(
            &body.token,
            ApproveRequest {
                resolution,
                consent,
            },
        )
        .await?;

    if !logged_in {
        let session = Session::issue(
            outcome.parent_id,
            app_state.clock.now(),
            app_state.config.session_lifetime,
        );
        if let Err(e) = store_session(&cookie_session, session).await {
            tracing::warn!("Approved, but failed to log parent in: {}", e);
        }
    }

    Ok(Json(outcome))
}

pub async fn decline_handler(
    State(app_state): State<AppState>,
    Json(body): Json<DeclineBody>,
) -> Result<Json<ApprovalSummary>> {
    let approval = app_state
        .approval_service
        .decline_with_token(&body.token)
        .await?;
    Ok(Json(approval.into()))
}

pub async fn list_parent_approvals(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<ApprovalSummary>>> {
    let account = app_state
        .account_service
        .find_by_id(session.user_id)
        .await?
        .ok_or(AppError::AuthenticationRequired)?;
    let Some(email) = account.email else {
        return Ok(Json(Vec::new()));
    };

    let approvals = app_state
        .approval_service
        .get_approvals_by_parent_email(&email)
        .await?;

    Ok(Json(approvals.into_iter().map(Into::into).collect()))
}
