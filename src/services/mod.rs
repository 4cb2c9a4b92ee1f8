pub mod account_service;
pub mod approval_service;
pub mod auth_token_service;
pub mod consent_service;
pub mod email_service;
pub mod invite_service;
pub mod notifier;
pub mod plan_service;
pub mod token_service;

pub use account_service::{AccountService, AccountServiceError, ParentSignup};
pub use approval_service::{
    ApprovalError, ApprovalOutcome, ApprovalService, ApproveRequest, CreateApprovalRequest,
    CreatedApproval, ParentResolution, PlanSelection, WaitingChild,
};
pub use auth_token_service::{AuthTokenError, AuthTokenService};
pub use consent_service::{ConsentError, ConsentService};
pub use email_service::{create_email_sender, EmailError, EmailSender};
pub use invite_service::{InviteError, InviteService, RedeemInviteRequest};
pub use notifier::Notifier;
pub use plan_service::{CreatePlanRequest, PlanError, PlanService, SeatReservation};
pub use token_service::{TokenError, TokenStore};
