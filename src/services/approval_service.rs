use crate::clock::Clock;
use crate::config::workflow::WorkflowConfig;
use crate::models::{
    Account, AccountRole, ApprovalContext, ApprovalStatus, ApprovalUpdate, ChildProfile,
    ConsentInput, LinkPermissions, MembershipRole, NewApproval, ParentApproval, ParentLinkRole,
    ParentState, Session, TokenKind,
};
use crate::repositories::account_repository::RepositoryError;
use crate::repositories::approval_repository::{apply_update_in, ApprovalRepository};
use crate::services::account_service::{AccountService, AccountServiceError, ParentSignup};
use crate::services::consent_service::{ConsentError, ConsentService};
use crate::services::notifier::Notifier;
use crate::services::plan_service::{plan_for_owner_in, PlanError, PlanService, SeatReservation};
use crate::services::token_service::{TokenError, TokenStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval link not found")]
    TokenNotFound,
    #[error("Approval link already used")]
    TokenAlreadyUsed,
    #[error("Approval link expired")]
    TokenExpired,
    #[error("Approval already {status}")]
    ApprovalAlreadyProcessed {
        status: ApprovalStatus,
        outcome: Option<ApprovalOutcome>,
    },
    #[error("Account role {0} cannot approve a child")]
    IncompatibleRole(AccountRole),
    #[error("Plan is full ({current_members}/{max_members} seats used)")]
    CapacityExceeded {
        slots_remaining: i64,
        max_members: i64,
        current_members: i64,
    },
    #[error("A pending approval already exists for this child")]
    DuplicatePendingApproval,
    #[error("Red Alert agreement must be accepted")]
    ConsentNotAccepted,
    #[error("Not authorized to act on this approval")]
    NotAuthorized,
    #[error("Approval not found")]
    ApprovalNotFound,
    #[error("Plan not found")]
    PlanNotFound,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Account error: {0}")]
    Account(AccountServiceError),
    #[error("Plan error: {0}")]
    Plan(PlanError),
}

impl From<TokenError> for ApprovalError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::NotFound => ApprovalError::TokenNotFound,
            TokenError::AlreadyUsed => ApprovalError::TokenAlreadyUsed,
            TokenError::Expired => ApprovalError::TokenExpired,
            TokenError::Database(e) => ApprovalError::Database(e),
        }
    }
}

impl From<PlanError> for ApprovalError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            } => ApprovalError::CapacityExceeded {
                slots_remaining,
                max_members,
                current_members,
            },
            PlanError::PlanNotFound => ApprovalError::PlanNotFound,
            PlanError::Database(e) => ApprovalError::Database(e),
            other => ApprovalError::Plan(other),
        }
    }
}

impl From<ConsentError> for ApprovalError {
    fn from(e: ConsentError) -> Self {
        match e {
            ConsentError::ConsentNotAccepted => ApprovalError::ConsentNotAccepted,
            ConsentError::NotAuthorized => ApprovalError::NotAuthorized,
            ConsentError::LinkNotFound => {
                ApprovalError::Repository(RepositoryError::NotFound)
            }
            ConsentError::Database(e) => ApprovalError::Database(e),
        }
    }
}

impl From<AccountServiceError> for ApprovalError {
    fn from(e: AccountServiceError) -> Self {
        match e {
            AccountServiceError::IncompatibleRole(role) => ApprovalError::IncompatibleRole(role),
            AccountServiceError::InvalidEmail => {
                ApprovalError::Validation("invalid email address".to_string())
            }
            AccountServiceError::WeakPassword => ApprovalError::Validation(
                "password must be at least 8 characters".to_string(),
            ),
            AccountServiceError::SignupRequired => ApprovalError::Validation(
                "signup details are required for a new parent account".to_string(),
            ),
            AccountServiceError::RepositoryError(e) => ApprovalError::Repository(e),
            other => ApprovalError::Account(other),
        }
    }
}

/// How the approving parent identifies themselves.
#[derive(Debug, Clone)]
pub enum ParentResolution {
    /// No session: find the account by the approval's email, or create one.
    Signup(ParentSignup),
    /// Logged-in parent; the session's account must own the approval's email.
    Existing(Session),
}

#[derive(Debug, Clone)]
pub struct ApproveRequest {
    pub resolution: ParentResolution,
    pub consent: ConsentInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub approval_id: i64,
    pub parent_id: i64,
    pub child_id: i64,
    pub parent_state: ParentState,
    pub seat: Option<SeatReservation>,
}

#[derive(Debug, Clone)]
pub struct CreateApprovalRequest {
    pub child: ChildProfile,
    pub parent_email: String,
    pub context: ApprovalContext,
    pub invite_id: Option<i64>,
    pub cliq_id: Option<i64>,
    pub child_id: Option<i64>,
    pub existing_parent_id: Option<i64>,
}

impl CreateApprovalRequest {
    pub fn direct_signup(child: ChildProfile, parent_email: impl Into<String>) -> Self {
        Self {
            child,
            parent_email: parent_email.into(),
            context: ApprovalContext::DirectSignup,
            invite_id: None,
            cliq_id: None,
            child_id: None,
            existing_parent_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedApproval {
    pub approval: ParentApproval,
    pub raw_secret: String,
    pub email_delivered: bool,
}

/// Result of seating a parent's deferred children on their plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSelection {
    pub plan_id: i64,
    pub seated: Vec<SeatReservation>,
    /// Children the plan had no room for; they stay deferred.
    pub waiting: Vec<WaitingChild>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitingChild {
    pub approval_id: i64,
    pub child_id: i64,
}

/// Drives a parent approval from request to its terminal state.
pub struct ApprovalService {
    pool: SqlitePool,
    approvals: Arc<dyn ApprovalRepository>,
    accounts: Arc<AccountService>,
    tokens: TokenStore,
    plans: PlanService,
    consents: ConsentService,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

impl ApprovalService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        approvals: Arc<dyn ApprovalRepository>,
        accounts: Arc<AccountService>,
        tokens: TokenStore,
        plans: PlanService,
        consents: ConsentService,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            pool,
            approvals,
            accounts,
            tokens,
            plans,
            consents,
            notifier,
            clock,
            config,
        }
    }

    pub async fn create_approval(
        &self,
        request: CreateApprovalRequest,
    ) -> Result<CreatedApproval, ApprovalError> {
        let new_approval = self.prepare_approval(request)?;
        let approval = self
            .approvals
            .insert_unless_duplicate(new_approval.clone())
            .await?
            .ok_or_else(|| duplicate_request(&new_approval))?;

        self.deliver(approval).await
    }

    /// Validates a request into the row to insert. Nothing is written.
    pub(crate) fn prepare_approval(
        &self,
        request: CreateApprovalRequest,
    ) -> Result<NewApproval, ApprovalError> {
        let child = validate_child(&request.child, self.clock.now().date_naive())?;
        let parent_email = request.parent_email.trim().to_lowercase();
        if parent_email.is_empty() || !parent_email.contains('@') {
            return Err(ApprovalError::Validation(
                "invalid parent email address".to_string(),
            ));
        }

        let now = self.clock.now();
        Ok(NewApproval {
            child_birthdate: child.birthdate_string(),
            child_first_name: child.first_name,
            child_last_name: child.last_name,
            parent_email,
            context: request.context,
            invite_id: request.invite_id,
            cliq_id: request.cliq_id,
            existing_parent_id: request.existing_parent_id,
            child_id: request.child_id,
            created_at: now.timestamp(),
            expires_at: (now + self.config.approval_ttl).timestamp(),
        })
    }

    /// Issues the link for a freshly inserted approval and emails it to the
    /// parent.
    pub(crate) async fn deliver(
        &self,
        mut approval: ParentApproval,
    ) -> Result<CreatedApproval, ApprovalError> {
        let token = self
            .tokens
            .issue(
                TokenKind::ApprovalLink,
                approval.id,
                None,
                Some(self.config.approval_ttl),
            )
            .await?;
        self.approvals
            .apply_update(
                approval.id,
                ApprovalUpdate::BindToken {
                    token_id: token.id.clone(),
                },
            )
            .await?;
        approval.token_id = Some(token.id);

        tracing::info!(
            "Created approval {} ({:?}) for parent {}",
            approval.id,
            approval.context,
            approval.parent_email
        );

        let email_delivered = self
            .notifier
            .approval_request(
                &approval.parent_email,
                &child_display_name(&approval),
                &token.raw_secret,
                token.expires_at,
            )
            .await;

        Ok(CreatedApproval {
            approval,
            raw_secret: token.raw_secret,
            email_delivered,
        })
    }

    /// Approves the request behind `raw_secret`.
    ///
    /// The status claim, the child account, consent, the parent link and the
    /// seat are written in one transaction whose first statement is the
    /// claim. Either all of them land or none do: a failure leaves the
    /// approval pending, and the same link can be used again once the cause
    /// is fixed.
    pub async fn approve_with_token(
        &self,
        raw_secret: &str,
        request: ApproveRequest,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        if !request.consent.red_alert_accepted {
            return Err(ApprovalError::ConsentNotAccepted);
        }

        let approval = self.redeem(raw_secret).await?;
        let now = self.clock.now();
        if !approval.is_live(now) {
            return Err(already_processed(&approval, now));
        }
        if approval.context == ApprovalContext::InviteFlow && approval.child_id.is_none() {
            return Err(ApprovalError::Validation(
                "invite approval has no child account".to_string(),
            ));
        }

        let parent = self
            .approving_parent(&approval, &request.resolution, now)
            .await?;
        if approval
            .existing_parent_id
            .is_some_and(|expected| expected != parent.id)
        {
            return Err(ApprovalError::NotAuthorized);
        }

        let mut tx = self.pool.begin().await?;

        // A write first, so the transaction holds the write lock from here on
        // and a concurrent decline is ordered entirely before or after it.
        let claimed = apply_update_in(
            &mut *tx,
            approval.id,
            ApprovalUpdate::Approve {
                parent_id: parent.id,
                approved_at: self.clock.now_ts(),
            },
        )
        .await?;
        if !claimed {
            tx.rollback().await?;
            let current = self
                .approvals
                .find_by_id(approval.id)
                .await?
                .ok_or(ApprovalError::ApprovalNotFound)?;
            return Err(already_processed(&current, self.clock.now()));
        }

        let child = self.accounts.admit_child_in(&mut *tx, &approval).await?;
        self.consents
            .record_consent_in(&mut *tx, parent.id, child.id, &request.consent)
            .await?;
        self.consents
            .link_parent_in(
                &mut *tx,
                parent.id,
                child.id,
                ParentLinkRole::Primary,
                LinkPermissions::full(),
            )
            .await?;

        let seat = match plan_for_owner_in(&mut *tx, parent.id).await? {
            Some(plan) => Some(
                self.plans
                    .reserve_seat_in(&mut *tx, plan.id, child.id, MembershipRole::Child)
                    .await?,
            ),
            None => None,
        };
        let parent_state = if seat.is_some() {
            ParentState::Completed
        } else {
            ParentState::Started
        };

        apply_update_in(
            &mut *tx,
            approval.id,
            ApprovalUpdate::RecordAdmission {
                child_id: child.id,
                parent_state,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            "Approval {} approved by parent {} for child {} ({:?})",
            approval.id,
            parent.id,
            child.id,
            parent_state
        );

        self.notifier
            .approval_confirmed(&approval.parent_email, &child_display_name(&approval))
            .await;

        Ok(ApprovalOutcome {
            approval_id: approval.id,
            parent_id: parent.id,
            child_id: child.id,
            parent_state,
            seat,
        })
    }

    /// Finds or creates the account approving `approval`, checking that a
    /// logged-in caller owns the approval's email.
    async fn approving_parent(
        &self,
        approval: &ParentApproval,
        resolution: &ParentResolution,
        now: DateTime<Utc>,
    ) -> Result<Account, ApprovalError> {
        let resolved = match resolution {
            ParentResolution::Existing(session) => {
                if !session.is_active_at(now) {
                    return Err(ApprovalError::NotAuthorized);
                }
                let account = self
                    .accounts
                    .find_by_id(session.user_id)
                    .await?
                    .ok_or(ApprovalError::NotAuthorized)?;
                let owns_email = account
                    .email
                    .as_deref()
                    .is_some_and(|email| email.eq_ignore_ascii_case(&approval.parent_email));
                if !owns_email {
                    tracing::warn!(
                        "Account {} tried to approve request {} addressed to another email",
                        account.id,
                        approval.id
                    );
                    return Err(ApprovalError::NotAuthorized);
                }
                self.accounts
                    .resolve_parent(&approval.parent_email, None)
                    .await?
            }
            ParentResolution::Signup(signup) => {
                self.accounts
                    .resolve_parent(&approval.parent_email, Some(signup))
                    .await?
            }
        };

        Ok(resolved.account)
    }

    pub async fn decline_with_token(
        &self,
        raw_secret: &str,
    ) -> Result<ParentApproval, ApprovalError> {
        let approval = self.redeem(raw_secret).await?;
        let now = self.clock.now();
        if !approval.is_live(now) {
            return Err(already_processed(&approval, now));
        }

        let declined = self
            .approvals
            .apply_update(
                approval.id,
                ApprovalUpdate::Decline {
                    declined_at: now.timestamp(),
                },
            )
            .await?;

        let current = self
            .approvals
            .find_by_id(approval.id)
            .await?
            .ok_or(ApprovalError::ApprovalNotFound)?;

        if !declined {
            return Err(already_processed(&current, self.clock.now()));
        }

        tracing::info!("Approval {} declined", approval.id);
        Ok(current.with_effective_status(self.clock.now()))
    }

    /// Issues a fresh link for a live approval and emails it. Earlier links
    /// stay valid until their own expiry.
    pub async fn resend_approval(
        &self,
        approval_id: i64,
    ) -> Result<CreatedApproval, ApprovalError> {
        let mut approval = self
            .approvals
            .find_by_id(approval_id)
            .await?
            .ok_or(ApprovalError::ApprovalNotFound)?;
        let now = self.clock.now();
        if !approval.is_live(now) {
            return Err(already_processed(&approval, now));
        }

        let remaining = approval.expires_at_time() - now;
        let token = self
            .tokens
            .issue(TokenKind::ApprovalLink, approval.id, None, Some(remaining))
            .await?;
        self.approvals
            .apply_update(
                approval.id,
                ApprovalUpdate::BindToken {
                    token_id: token.id.clone(),
                },
            )
            .await?;
        approval.token_id = Some(token.id);

        tracing::info!("Resent approval link for approval {}", approval.id);

        let email_delivered = self
            .notifier
            .approval_request(
                &approval.parent_email,
                &child_display_name(&approval),
                &token.raw_secret,
                token.expires_at,
            )
            .await;

        Ok(CreatedApproval {
            approval,
            raw_secret: token.raw_secret,
            email_delivered,
        })
    }

    /// Seats every child whose approval was deferred because the parent had
    /// no plan yet, or because the plan was full.
    ///
    /// Each child is seated in its own transaction. A child the plan has no
    /// room for is reported in `waiting` and the rest are still tried, so
    /// calling this again after the plan grows picks up where it stopped.
    pub async fn complete_plan_selection(
        &self,
        owner_id: i64,
    ) -> Result<PlanSelection, ApprovalError> {
        let plan = self
            .plans
            .plan_for_owner(owner_id)
            .await?
            .ok_or(ApprovalError::PlanNotFound)?;

        let mut selection = PlanSelection {
            plan_id: plan.id,
            seated: Vec::new(),
            waiting: Vec::new(),
        };
        for approval in self.approvals.list_started_for_parent(owner_id).await? {
            let Some(child_id) = approval.child_id else {
                continue;
            };

            let mut tx = self.pool.begin().await?;
            match self
                .plans
                .reserve_seat_in(&mut *tx, plan.id, child_id, MembershipRole::Child)
                .await
            {
                Ok(seat) => {
                    apply_update_in(&mut *tx, approval.id, ApprovalUpdate::CompleteParentState)
                        .await?;
                    tx.commit().await?;
                    selection.seated.push(seat);
                }
                Err(PlanError::CapacityExceeded { .. }) => {
                    tx.rollback().await?;
                    selection.waiting.push(WaitingChild {
                        approval_id: approval.id,
                        child_id,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !selection.seated.is_empty() || !selection.waiting.is_empty() {
            tracing::info!(
                "Plan {} of parent {}: seated {} deferred children, {} still waiting",
                plan.id,
                owner_id,
                selection.seated.len(),
                selection.waiting.len()
            );
        }

        Ok(selection)
    }

    /// Read-only: the approval a link refers to, whether or not the link is
    /// still usable.
    pub async fn get_approval_by_token(
        &self,
        raw_secret: &str,
    ) -> Result<ParentApproval, ApprovalError> {
        let token = self
            .tokens
            .peek(TokenKind::ApprovalLink, raw_secret)
            .await?
            .ok_or(ApprovalError::TokenNotFound)?;
        let approval = self
            .approvals
            .find_by_id(token.subject_id)
            .await?
            .ok_or(ApprovalError::ApprovalNotFound)?;

        Ok(approval.with_effective_status(self.clock.now()))
    }

    pub async fn get_approvals_by_parent_email(
        &self,
        email: &str,
    ) -> Result<Vec<ParentApproval>, ApprovalError> {
        let now = self.clock.now();
        Ok(self
            .approvals
            .list_by_parent_email(email)
            .await?
            .into_iter()
            .map(|approval| approval.with_effective_status(now))
            .collect())
    }

    pub async fn find_approval(&self, id: i64) -> Result<Option<ParentApproval>, ApprovalError> {
        let now = self.clock.now();
        Ok(self
            .approvals
            .find_by_id(id)
            .await?
            .map(|approval| approval.with_effective_status(now)))
    }

    /// Consumes the link, falling back to the already-bound approval when the
    /// link was spent by an earlier attempt.
    async fn redeem(&self, raw_secret: &str) -> Result<ParentApproval, ApprovalError> {
        let approval_id = match self
            .tokens
            .consume(TokenKind::ApprovalLink, raw_secret, None)
            .await
        {
            Ok(consumed) => consumed.subject_id,
            Err(TokenError::AlreadyUsed) => {
                let token = self
                    .tokens
                    .peek(TokenKind::ApprovalLink, raw_secret)
                    .await?
                    .ok_or(ApprovalError::TokenNotFound)?;
                tracing::debug!(
                    "Approval link {} already used; resuming approval {}",
                    token.id,
                    token.subject_id
                );
                token.subject_id
            }
            Err(e) => return Err(e.into()),
        };

        self.approvals
            .find_by_id(approval_id)
            .await?
            .ok_or(ApprovalError::ApprovalNotFound)
    }
}

pub(crate) fn duplicate_request(approval: &NewApproval) -> ApprovalError {
    tracing::info!(
        "Duplicate approval request for {} {} ({})",
        approval.child_first_name,
        approval.child_last_name,
        approval.parent_email
    );
    ApprovalError::DuplicatePendingApproval
}

fn already_processed(approval: &ParentApproval, now: DateTime<Utc>) -> ApprovalError {
    let status = approval.effective_status(now);
    let outcome = match (status, approval.parent_id, approval.child_id) {
        (ApprovalStatus::Approved, Some(parent_id), Some(child_id)) => Some(ApprovalOutcome {
            approval_id: approval.id,
            parent_id,
            child_id,
            parent_state: approval.parent_state.unwrap_or(ParentState::Started),
            seat: None,
        }),
        _ => None,
    };
    ApprovalError::ApprovalAlreadyProcessed { status, outcome }
}

fn child_display_name(approval: &ParentApproval) -> String {
    format!("{} {}", approval.child_first_name, approval.child_last_name)
}

pub(crate) fn validate_child(
    child: &ChildProfile,
    today: chrono::NaiveDate,
) -> Result<ChildProfile, ApprovalError> {
    let first_name = child.first_name.trim();
    let last_name = child.last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApprovalError::Validation(
            "child first and last name are required".to_string(),
        ));
    }
    if child.birthdate > today {
        return Err(ApprovalError::Validation(
            "child birthdate is in the future".to_string(),
        ));
    }
    Ok(ChildProfile {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        birthdate: child.birthdate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn profile(first: &str, last: &str) -> ChildProfile {
        ChildProfile {
            first_name: first.to_string(),
            last_name: last.to_string(),
            birthdate: NaiveDate::from_ymd_opt(2013, 4, 2).expect("date"),
        }
    }

    #[test]
    fn child_names_are_trimmed() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
        let child = validate_child(&profile("  Ava ", " Lee"), today).expect("valid");
        assert_eq!(child.first_name, "Ava");
        assert_eq!(child.last_name, "Lee");
    }

    #[test]
    fn blank_or_unborn_child_is_rejected() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
        assert!(matches!(
            validate_child(&profile(" ", "Lee"), today),
            Err(ApprovalError::Validation(_))
        ));

        let mut unborn = profile("Ava", "Lee");
        unborn.birthdate = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        assert!(matches!(
            validate_child(&unborn, today),
            Err(ApprovalError::Validation(_))
        ));
    }

    #[test]
    fn capacity_errors_keep_slot_data() {
        let error: ApprovalError = PlanError::CapacityExceeded {
            slots_remaining: 0,
            max_members: 1,
            current_members: 1,
        }
        .into();
        assert!(matches!(
            error,
            ApprovalError::CapacityExceeded {
                slots_remaining: 0,
                max_members: 1,
                current_members: 1
            }
        ));
    }

    #[test]
    fn declined_approval_reports_no_outcome() {
        let now = chrono::Utc::now();
        let approval = ParentApproval {
            id: 3,
            child_first_name: "Ava".to_string(),
            child_last_name: "Lee".to_string(),
            child_birthdate: "2013-04-02".to_string(),
            parent_email: "p@example.com".to_string(),
            context: ApprovalContext::DirectSignup,
            invite_id: None,
            cliq_id: None,
            existing_parent_id: None,
            child_id: Some(8),
            parent_id: None,
            token_id: None,
            status: ApprovalStatus::Declined,
            parent_state: None,
            created_at: 0,
            expires_at: now.timestamp() + 60,
            approved_at: None,
            declined_at: Some(now.timestamp()),
        };

        match already_processed(&approval, now) {
            ApprovalError::ApprovalAlreadyProcessed { status, outcome } => {
                assert_eq!(status, ApprovalStatus::Declined);
                assert!(outcome.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
