pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use clock::Clock;
use config::WorkflowConfig;
use repositories::{SqliteAccountRepository, SqliteApprovalRepository};
use services::{
    AccountService, ApprovalService, AuthTokenService, ConsentService, EmailSender,
    InviteService, Notifier, PlanService, TokenStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub account_service: Arc<AccountService>,
    pub approval_service: Arc<ApprovalService>,
    pub auth_token_service: Arc<AuthTokenService>,
    pub invite_service: Arc<InviteService>,
    pub plan_service: PlanService,
    pub consent_service: ConsentService,
    pub token_store: TokenStore,
    pub clock: Arc<dyn Clock>,
    pub config: WorkflowConfig,
    pub pool: SqlitePool,
}

impl AppState {
    /// Wires every service onto one pool, clock and mail transport.
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        email_sender: Arc<dyn EmailSender>,
        config: WorkflowConfig,
    ) -> Self {
        let account_repository = Arc::new(SqliteAccountRepository::new(pool.clone()));
        let approval_repository = Arc::new(SqliteApprovalRepository::new(pool.clone()));

        let notifier = Notifier::new(email_sender, config.clone());
        let token_store = TokenStore::new(pool.clone(), clock.clone(), config.clone());
        let plan_service = PlanService::new(pool.clone(), clock.clone());
        let consent_service = ConsentService::new(pool.clone(), clock.clone());
        let account_service = Arc::new(AccountService::new(
            account_repository.clone(),
            clock.clone(),
        ));

        let approval_service = Arc::new(ApprovalService::new(
            pool.clone(),
            approval_repository,
            account_service.clone(),
            token_store.clone(),
            plan_service.clone(),
            consent_service.clone(),
            notifier.clone(),
            clock.clone(),
            config.clone(),
        ));
        let auth_token_service = Arc::new(AuthTokenService::new(
            token_store.clone(),
            account_repository,
            notifier.clone(),
            clock.clone(),
            config.clone(),
        ));
        let invite_service = Arc::new(InviteService::new(
            pool.clone(),
            token_store.clone(),
            account_service.clone(),
            approval_service.clone(),
            notifier,
            clock.clone(),
            config.clone(),
        ));

        Self {
            account_service,
            approval_service,
            auth_token_service,
            invite_service,
            plan_service,
            consent_service,
            token_store,
            clock,
            config,
            pool,
        }
    }
}

/// JSON API routes. The caller adds the session layer on top.
pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/parent/approvals", get(handlers::list_parent_approvals))
        .route("/parent/children", get(handlers::list_children_handler))
        .route(
            "/parent/children/{child_id}/links/{parent_id}",
            put(handlers::update_permissions_handler),
        )
        .route(
            "/parent/consents/{child_id}",
            post(handlers::update_consent_handler),
        )
        .route("/invites", post(handlers::create_invite_handler))
        .route("/plans", post(handlers::create_plan_handler))
        .route(
            "/plans/{id}/capacity",
            put(handlers::change_capacity_handler),
        )
        .route("/plans/{id}/seats", post(handlers::reserve_seat_handler))
        .route(
            "/plans/{id}/seats/{member_id}",
            delete(handlers::release_seat_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/auth/magic-link", post(auth::handlers::request_magic_link))
        .route("/auth/magic/{token}", get(auth::handlers::verify_magic_link))
        .route("/auth/logout", post(auth::handlers::logout_handler))
        .route("/approvals", post(handlers::create_approval_handler))
        .route(
            "/approvals/status/{token}",
            get(handlers::approval_status_handler),
        )
        .route("/approvals/approve", post(handlers::approve_handler))
        .route("/approvals/decline", post(handlers::decline_handler))
        .route("/invites/redeem", post(handlers::redeem_invite_handler))
        .route(
            "/plans/{id}/availability",
            get(handlers::plan_availability_handler),
        )
        .merge(protected_routes)
        .with_state(state)
}
