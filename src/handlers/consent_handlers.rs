use crate::error::Result;
use crate::handlers::client_metadata;
use crate::models::{ConsentInput, LinkPermissions, ParentConsent, ParentLink, Session};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ConsentBody {
    red_alert_accepted: bool,
    #[serde(default)]
    silent_monitoring_enabled: bool,
}

pub async fn update_consent_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(child_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<ConsentBody>,
) -> Result<Json<ParentConsent>> {
    let (ip_address, user_agent) = client_metadata(&headers);
    let consent = app_state
        .consent_service
        .update_consent(
            &session,
            child_id,
            &ConsentInput {
                red_alert_accepted: body.red_alert_accepted,
                silent_monitoring_enabled: body.silent_monitoring_enabled,
                ip_address,
                user_agent,
            },
        )
        .await?;

    Ok(Json(consent))
}

/// Every child the logged-in parent is linked to.
pub async fn list_children_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<ParentLink>>> {
    let links = app_state
        .consent_service
        .links_for_parent(session.user_id)
        .await?;
    Ok(Json(links))
}

pub async fn update_permissions_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((child_id, parent_id)): Path<(i64, i64)>,
    Json(permissions): Json<LinkPermissions>,
) -> Result<Json<ParentLink>> {
    let link = app_state
        .consent_service
        .update_permissions(&session, parent_id, child_id, permissions)
        .await?;
    Ok(Json(link))
}
