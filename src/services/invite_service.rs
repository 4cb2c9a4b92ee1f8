use crate::clock::Clock;
use crate::config::workflow::WorkflowConfig;
use crate::models::{ApprovalContext, ChildProfile, Invite, Session, TokenKind};
use crate::services::account_service::{AccountService, AccountServiceError};
use crate::repositories::approval_repository::insert_unless_duplicate_in;
use crate::services::approval_service::{
    duplicate_request, validate_child, ApprovalError, ApprovalService, CreateApprovalRequest,
    CreatedApproval,
};
use crate::services::notifier::Notifier;
use crate::services::token_service::{TokenError, TokenStore};
use sqlx::SqlitePool;
use std::sync::Arc;

const INVITE_COLUMNS: &str =
    "id, inviter_id, cliq_id, invitee_email, created_at, redeemed_by, redeemed_at";

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("Invite code not found")]
    TokenNotFound,
    #[error("Invite code already used")]
    TokenAlreadyUsed,
    #[error("Invite code expired")]
    TokenExpired,
    #[error("Not authorized to invite")]
    NotAuthorized,
    #[error("Invite not found")]
    InviteNotFound,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Account error: {0}")]
    Account(#[from] AccountServiceError),
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<TokenError> for InviteError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::NotFound => InviteError::TokenNotFound,
            TokenError::AlreadyUsed => InviteError::TokenAlreadyUsed,
            TokenError::Expired => InviteError::TokenExpired,
            TokenError::Database(e) => InviteError::Database(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedInvite {
    pub invite: Invite,
    pub code: String,
    pub email_delivered: bool,
}

#[derive(Debug, Clone)]
pub struct RedeemInviteRequest {
    pub code: String,
    pub cliq_id: i64,
    pub child: ChildProfile,
    pub parent_email: String,
}

/// Cliq invitations. A child redeeming one gets a pending account and an
/// approval request addressed to their parent.
pub struct InviteService {
    pool: SqlitePool,
    tokens: TokenStore,
    accounts: Arc<AccountService>,
    approvals: Arc<ApprovalService>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

impl InviteService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        tokens: TokenStore,
        accounts: Arc<AccountService>,
        approvals: Arc<ApprovalService>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            pool,
            tokens,
            accounts,
            approvals,
            notifier,
            clock,
            config,
        }
    }

    pub async fn create_invite(
        &self,
        session: &Session,
        cliq_id: i64,
        invitee_email: Option<String>,
    ) -> Result<CreatedInvite, InviteError> {
        if !session.is_active_at(self.clock.now()) {
            return Err(InviteError::NotAuthorized);
        }
        let inviter = self
            .accounts
            .find_by_id(session.user_id)
            .await?
            .filter(|account| account.is_active())
            .ok_or(InviteError::NotAuthorized)?;

        let invitee_email = invitee_email
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty());
        if let Some(email) = &invitee_email {
            if !email.contains('@') {
                return Err(InviteError::Validation(
                    "invalid invitee email address".to_string(),
                ));
            }
        }

        let invite = sqlx::query_as::<_, Invite>(&format!(
            r#"
            INSERT INTO invites (inviter_id, cliq_id, invitee_email, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(inviter.id)
        .bind(cliq_id)
        .bind(&invitee_email)
        .bind(self.clock.now_ts())
        .fetch_one(&self.pool)
        .await?;

        let token = self
            .tokens
            .issue(
                TokenKind::InviteCode,
                invite.id,
                Some(cliq_id),
                Some(self.config.invite_ttl),
            )
            .await?;

        tracing::info!(
            "Account {} created invite {} for cliq {}",
            inviter.id,
            invite.id,
            cliq_id
        );

        let email_delivered = match &invitee_email {
            Some(email) => {
                let inviter_name = format!("{} {}", inviter.first_name, inviter.last_name);
                self.notifier
                    .invite(email, &inviter_name, &token.raw_secret)
                    .await
            }
            None => false,
        };

        Ok(CreatedInvite {
            invite,
            code: token.raw_secret,
            email_delivered,
        })
    }

    /// Redeems an invite code on behalf of a child. The code only works for
    /// the cliq it was issued for.
    ///
    /// Spending the code, creating the pending child, marking the invite and
    /// opening the approval commit together. If any of them fails, including
    /// a duplicate pending approval, the code stays usable and no child
    /// account is left behind.
    pub async fn redeem_child_invite(
        &self,
        request: RedeemInviteRequest,
    ) -> Result<CreatedApproval, InviteError> {
        crate::services::account_service::validate_email(&request.parent_email)?;
        let child = validate_child(&request.child, self.clock.now().date_naive())?;
        let mut new_approval = self.approvals.prepare_approval(CreateApprovalRequest {
            child: child.clone(),
            parent_email: request.parent_email,
            context: ApprovalContext::InviteFlow,
            invite_id: None,
            cliq_id: Some(request.cliq_id),
            child_id: None,
            existing_parent_id: None,
        })?;

        let mut tx = self.pool.begin().await?;

        let consumed = self
            .tokens
            .consume_in(
                &mut *tx,
                TokenKind::InviteCode,
                &request.code,
                Some(request.cliq_id),
            )
            .await?;
        let invite_id = consumed.subject_id;

        let child_account = self
            .accounts
            .create_pending_child_in(&mut *tx, &child)
            .await?;

        let redeemed = sqlx::query(
            "UPDATE invites SET redeemed_by = ?, redeemed_at = ?
             WHERE id = ? AND redeemed_by IS NULL",
        )
        .bind(child_account.id)
        .bind(self.clock.now_ts())
        .bind(invite_id)
        .execute(&mut *tx)
        .await?;
        if redeemed.rows_affected() == 0 {
            tracing::warn!("Invite {} was already marked redeemed", invite_id);
        }

        new_approval.invite_id = Some(invite_id);
        new_approval.child_id = Some(child_account.id);
        let approval = insert_unless_duplicate_in(&mut *tx, &new_approval)
            .await
            .map_err(ApprovalError::from)?
            .ok_or_else(|| duplicate_request(&new_approval))?;
        tx.commit().await?;

        tracing::info!(
            "Invite {} redeemed by pending child {}; approval {} opened",
            invite_id,
            child_account.id,
            approval.id
        );

        Ok(self.approvals.deliver(approval).await?)
    }

    pub async fn find_invite(&self, id: i64) -> Result<Option<Invite>, InviteError> {
        let invite = sqlx::query_as::<_, Invite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invite)
    }
}
