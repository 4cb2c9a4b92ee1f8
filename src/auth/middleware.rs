use crate::config::session::read_session;
use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;

/// Rejects requests without a live login session and hands the explicit
/// [`crate::models::Session`] to handlers as a request extension.
pub async fn require_auth(
    State(app_state): State<AppState>,
    cookie_session: Session,
    mut request: Request,
    next: Next,
) -> Response {
    match read_session(&cookie_session).await {
        Some(session) if session.is_active_at(app_state.clock.now()) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Some(session) => {
            tracing::debug!("Session of account {} has expired", session.user_id);
            AppError::AuthenticationRequired.into_response()
        }
        None => AppError::AuthenticationRequired.into_response(),
    }
}
