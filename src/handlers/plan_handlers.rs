use crate::error::{AppError, Result};
use crate::models::{BillingCycle, MembershipRole, Plan, SeatAvailability, Session};
use crate::services::{CreatePlanRequest, PlanSelection, SeatReservation};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreatePlanBody {
    max_members: i64,
    #[serde(default)]
    is_group_plan: bool,
    billing_cycle: BillingCycle,
    stripe_subscription_id: Option<String>,
}

#[derive(Serialize)]
pub struct PlanResponse {
    plan: Plan,
    /// Deferred children seated by this change, and those still waiting.
    selection: PlanSelection,
}

#[derive(Deserialize)]
pub struct CapacityBody {
    max_members: i64,
}

#[derive(Deserialize)]
pub struct ReserveSeatBody {
    member_id: i64,
    role: MembershipRole,
}

pub async fn create_plan_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<CreatePlanBody>,
) -> Result<(StatusCode, Json<PlanResponse>)> {
    let plan = app_state
        .plan_service
        .create_plan(CreatePlanRequest {
            owner_id: session.user_id,
            max_members: body.max_members,
            is_group_plan: body.is_group_plan,
            billing_cycle: body.billing_cycle,
            stripe_subscription_id: body.stripe_subscription_id,
        })
        .await?;

    let response = seat_waiting_children(&app_state, plan.id, session.user_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Changes a plan's seat count and seats any deferred children that now fit.
pub async fn change_capacity_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(plan_id): Path<i64>,
    Json(body): Json<CapacityBody>,
) -> Result<Json<PlanResponse>> {
    require_owner(&app_state, &session, plan_id).await?;
    app_state
        .plan_service
        .change_capacity(plan_id, body.max_members)
        .await?;

    let response = seat_waiting_children(&app_state, plan_id, session.user_id).await?;
    Ok(Json(response))
}

async fn seat_waiting_children(
    app_state: &AppState,
    plan_id: i64,
    owner_id: i64,
) -> Result<PlanResponse> {
    let selection = app_state
        .approval_service
        .complete_plan_selection(owner_id)
        .await?;

    // Re-read so the member count includes the children just seated.
    let plan = app_state
        .plan_service
        .find_plan(plan_id)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;

    Ok(PlanResponse { plan, selection })
}

pub async fn plan_availability_handler(
    State(app_state): State<AppState>,
    Path(plan_id): Path<i64>,
) -> Result<Json<SeatAvailability>> {
    let availability = app_state.plan_service.check_availability(plan_id).await?;
    Ok(Json(availability))
}

pub async fn reserve_seat_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(plan_id): Path<i64>,
    Json(body): Json<ReserveSeatBody>,
) -> Result<Json<SeatReservation>> {
    require_owner(&app_state, &session, plan_id).await?;
    let seat = app_state
        .plan_service
        .reserve_seat(plan_id, body.member_id, body.role)
        .await?;
    Ok(Json(seat))
}

pub async fn release_seat_handler(
    State(app_state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((plan_id, member_id)): Path<(i64, i64)>,
) -> Result<Json<SeatAvailability>> {
    require_owner(&app_state, &session, plan_id).await?;
    let availability = app_state
        .plan_service
        .release_seat(plan_id, member_id)
        .await?;
    Ok(Json(availability))
}

async fn require_owner(app_state: &AppState, session: &Session, plan_id: i64) -> Result<()> {
    let plan = app_state
        .plan_service
        .find_plan(plan_id)
        .await?
        .ok_or(AppError::NotFound("Plan"))?;
    if plan.owner_id != session.user_id {
        return Err(AppError::NotAuthorized);
    }
    Ok(())
}
