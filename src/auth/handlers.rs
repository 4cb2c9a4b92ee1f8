use crate::config::session::{clear_session, store_session};
use crate::error::{AppError, Result};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_sessions::Session;

#[derive(Deserialize)]
pub struct MagicLinkRequest {
    email: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    account_id: i64,
    role: crate::models::AccountRole,
    session_expires_at: i64,
}

pub async fn request_magic_link(
    State(app_state): State<AppState>,
    Json(request): Json<MagicLinkRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    app_state
        .auth_token_service
        .request_magic_link(&request.email)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "If an account exists for this email, a login link is on its way"
        })),
    ))
}

pub async fn verify_magic_link(
    State(app_state): State<AppState>,
    cookie_session: Session,
    Path(token): Path<String>,
) -> Result<Json<LoginResponse>> {
    let (account, session) = app_state
        .auth_token_service
        .verify_magic_link(&token)
        .await?;

    store_session(&cookie_session, session)
        .await
        .map_err(|e| AppError::InternalError(format!("failed to store session: {}", e)))?;

    Ok(Json(LoginResponse {
        account_id: account.id,
        role: account.role,
        session_expires_at: session.expires_at,
    }))
}

pub async fn logout_handler(cookie_session: Session) -> Result<StatusCode> {
    clear_session(&cookie_session)
        .await
        .map_err(|e| AppError::InternalError(format!("failed to clear session: {}", e)))?;
    Ok(StatusCode::NO_CONTENT)
}
