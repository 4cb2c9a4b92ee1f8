pub mod approval_handlers;
pub mod consent_handlers;
pub mod invite_handlers;
pub mod plan_handlers;

pub use approval_handlers::{
    approval_status_handler, approve_handler, create_approval_handler, decline_handler,
    list_parent_approvals,
};
pub use consent_handlers::{
    list_children_handler, update_consent_handler, update_permissions_handler,
};
pub use invite_handlers::{create_invite_handler, redeem_invite_handler};
pub use plan_handlers::{
    change_capacity_handler, create_plan_handler, plan_availability_handler, release_seat_handler,
    reserve_seat_handler,
};

use axum::http::{header, HeaderMap};

/// Client address and agent as recorded alongside a consent.
pub(crate) fn client_metadata(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    (ip_address, user_agent)
}
