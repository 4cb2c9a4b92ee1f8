use crate::error::Result;
use crate::models::{ChildProfile, Session};
use crate::services::RedeemInviteRequest;
use crate::AppState;
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreateInviteBody {
    cliq_id: i64,
    invitee_email: Option<String>,
}

#[derive(Serialize)]
pub struct CreatedInviteResponse {
    invite_id: i64,
    cliq_id: i64,
    code: String,
    email_delivered: bool,
}

#[derive(Deserialize)]
pub struct RedeemInviteBody {
    code: String,
    cliq_id: i64,
    child_first_name: String,
    child_last_name: String,
    child_birthdate: NaiveDate,
    parent_email: String,
}

#[derive(Serialize)]
pub struct RedeemedInviteResponse {
    approval_id: i64,
    child_id: Option<i64>,
    email_delivered: bool,
}

pub async fn create_invite_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<CreateInviteBody>,
) -> Result<(StatusCode, Json<CreatedInviteResponse>)> {
    let created = app_state
        .invite_service
        .create_invite(&session, body.cliq_id, body.invitee_email)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedInviteResponse {
            invite_id: created.invite.id,
            cliq_id: created.invite.cliq_id,
            code: created.code,
            email_delivered: created.email_delivered,
        }),
    ))
}

pub async fn redeem_invite_handler(
    State(app_state): State<AppState>,
    Json(body): Json<RedeemInviteBody>,
) -> Result<(StatusCode, Json<RedeemedInviteResponse>)> {
    let created = app_state
        .invite_service
        .redeem_child_invite(RedeemInviteRequest {
            code: body.code,
            cliq_id: body.cliq_id,
            child: ChildProfile {
                first_name: body.child_first_name,
                last_name: body.child_last_name,
                birthdate: body.child_birthdate,
            },
            parent_email: body.parent_email,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RedeemedInviteResponse {
            approval_id: created.approval.id,
            child_id: created.approval.child_id,
            email_delivered: created.email_delivered,
        }),
    ))
}
