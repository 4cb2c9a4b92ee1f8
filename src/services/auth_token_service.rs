use crate::clock::Clock;
use crate::config::workflow::WorkflowConfig;
use crate::models::{Account, Session, TokenKind};
use crate::repositories::account_repository::{AccountRepository, RepositoryError};
use crate::services::notifier::Notifier;
use crate::services::token_service::{TokenError, TokenStore};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AuthTokenError {
    #[error("Token not found")]
    TokenNotFound,
    #[error("Token already used")]
    TokenAlreadyUsed,
    #[error("Token expired")]
    TokenExpired,
    #[error("Account not found or inactive")]
    AccountNotFound,
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
}

impl From<TokenError> for AuthTokenError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::NotFound => AuthTokenError::TokenNotFound,
            TokenError::AlreadyUsed => AuthTokenError::TokenAlreadyUsed,
            TokenError::Expired => AuthTokenError::TokenExpired,
            TokenError::Database(e) => AuthTokenError::DatabaseError(e),
        }
    }
}

/// Passwordless login over emailed single-use links.
pub struct AuthTokenService {
    tokens: TokenStore,
    accounts: Arc<dyn AccountRepository>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

impl AuthTokenService {
    pub fn new(
        tokens: TokenStore,
        accounts: Arc<dyn AccountRepository>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            tokens,
            accounts,
            notifier,
            clock,
            config,
        }
    }

    /// Emails a login link to `email` if it belongs to an active account.
    /// Returns `Ok(())` either way so callers cannot tell which emails have accounts.
    pub async fn request_magic_link(&self, email: &str) -> Result<(), AuthTokenError> {
        let account = match self.accounts.find_by_email(email).await? {
            Some(account) if account.is_active() => account,
            _ => {
                tracing::debug!("Magic link requested for unknown or inactive email");
                return Ok(());
            }
        };

        let token = self
            .tokens
            .issue(
                TokenKind::MagicLink,
                account.id,
                None,
                Some(self.config.magic_link_ttl),
            )
            .await?;

        if let Some(address) = account.email.as_deref() {
            self.notifier.magic_link(address, &token.raw_secret).await;
        }

        Ok(())
    }

    /// Like [`Self::request_magic_link`] but hands the raw secret back. Used
    /// by the operator CLI.
    pub async fn issue_magic_link(&self, account_id: i64) -> Result<String, AuthTokenError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .await?
            .filter(Account::is_active)
            .ok_or(AuthTokenError::AccountNotFound)?;

        let token = self
            .tokens
            .issue(
                TokenKind::MagicLink,
                account.id,
                None,
                Some(self.config.magic_link_ttl),
            )
            .await?;

        Ok(token.raw_secret)
    }

    pub async fn verify_magic_link(
        &self,
        raw_secret: &str,
    ) -> Result<(Account, Session), AuthTokenError> {
        let consumed = self
            .tokens
            .consume(TokenKind::MagicLink, raw_secret, None)
            .await?;

        let account = self
            .accounts
            .find_by_id(consumed.subject_id)
            .await?
            .filter(Account::is_active)
            .ok_or(AuthTokenError::AccountNotFound)?;

        let session = Session::issue(account.id, self.clock.now(), self.config.session_lifetime);
        tracing::info!("Account {} logged in via magic link", account.id);

        Ok((account, session))
    }
}
