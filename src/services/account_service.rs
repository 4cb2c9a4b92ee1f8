use crate::clock::Clock;
use crate::models::{
    Account, AccountRole, AccountStatus, ApprovalContext, ChildProfile, NewAccount,
    ParentApproval, ParentUpgrade,
};
use crate::repositories::account_repository::{
    find_by_id_in, find_by_origin_approval_in, insert_account_in, set_status_in,
    AccountRepository, RepositoryError,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use serde::Deserialize;
use sqlx::SqliteConnection;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AccountServiceError {
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Password too weak (minimum 8 characters)")]
    WeakPassword,
    #[error("Email already registered")]
    EmailTaken,
    #[error("Account role {0} cannot become a parent")]
    IncompatibleRole(AccountRole),
    #[error("No account exists for this email and no signup details were given")]
    SignupRequired,
    #[error("Account not found")]
    AccountNotFound,
    #[error("Password hashing failed: {0}")]
    HashingError(String),
    #[error("Repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
}

/// Details a parent supplies when they have no account yet.
#[derive(Debug, Clone, Deserialize)]
pub struct ParentSignup {
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

pub struct CreateAccountRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub role: AccountRole,
}

#[derive(Debug, Clone)]
pub struct ResolvedParent {
    pub account: Account,
    pub created: bool,
    pub promoted: bool,
}

pub struct AccountService {
    repository: Arc<dyn AccountRepository>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(repository: Arc<dyn AccountRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn create_account(
        &self,
        request: CreateAccountRequest,
    ) -> Result<Account, AccountServiceError> {
        validate_email(&request.email)?;
        validate_password(&request.password)?;
        let password_hash = hash_password(&request.password)?;

        let account = NewAccount {
            email: Some(request.email),
            first_name: request.first_name,
            last_name: request.last_name,
            birthdate: None,
            role: request.role,
            status: AccountStatus::Active,
            password_hash: Some(password_hash),
            origin_approval_id: None,
        };

        match self
            .repository
            .create_account(account, self.clock.now_ts())
            .await
        {
            Ok(account) => Ok(account),
            Err(RepositoryError::AlreadyExists) => Err(AccountServiceError::EmailTaken),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Account>, AccountServiceError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountServiceError> {
        Ok(self.repository.find_by_email(email).await?)
    }

    /// Finds or creates the parent account for `email`.
    ///
    /// An adult is promoted in place, an existing parent is reused, and any
    /// other role is refused. A fresh parent account needs `signup`.
    pub async fn resolve_parent(
        &self,
        email: &str,
        signup: Option<&ParentSignup>,
    ) -> Result<ResolvedParent, AccountServiceError> {
        // Two passes: a concurrent request may create or promote the same
        // account between our read and our write.
        for _ in 0..2 {
            if let Some(account) = self.repository.find_by_email(email).await? {
                return self.upgrade_existing(account).await;
            }

            let signup = signup.ok_or(AccountServiceError::SignupRequired)?;
            validate_email(email)?;
            validate_password(&signup.password)?;

            let new_parent = NewAccount {
                email: Some(email.to_string()),
                first_name: signup.first_name.trim().to_string(),
                last_name: signup.last_name.trim().to_string(),
                birthdate: None,
                role: AccountRole::Parent,
                status: AccountStatus::Active,
                password_hash: Some(hash_password(&signup.password)?),
                origin_approval_id: None,
            };

            match self
                .repository
                .create_account(new_parent, self.clock.now_ts())
                .await
            {
                Ok(account) => {
                    tracing::info!("Created parent account {} for {}", account.id, email);
                    return Ok(ResolvedParent {
                        account,
                        created: true,
                        promoted: false,
                    });
                }
                Err(RepositoryError::AlreadyExists) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AccountServiceError::EmailTaken)
    }

    async fn upgrade_existing(
        &self,
        mut account: Account,
    ) -> Result<ResolvedParent, AccountServiceError> {
        match account
            .role
            .upgrade_to_parent()
            .map_err(AccountServiceError::IncompatibleRole)?
        {
            ParentUpgrade::AlreadyParent => Ok(ResolvedParent {
                account,
                created: false,
                promoted: false,
            }),
            ParentUpgrade::Promote => {
                let promoted = self.repository.promote_to_parent(account.id).await?;
                if !promoted {
                    // Someone changed the role under us; judge the fresh row.
                    let fresh = self
                        .repository
                        .find_by_id(account.id)
                        .await?
                        .ok_or(AccountServiceError::AccountNotFound)?;
                    if fresh.role != AccountRole::Parent {
                        return Err(AccountServiceError::IncompatibleRole(fresh.role));
                    }
                } else {
                    tracing::info!("Promoted adult account {} to parent", account.id);
                }
                account.role = AccountRole::Parent;
                Ok(ResolvedParent {
                    account,
                    created: false,
                    promoted,
                })
            }
        }
    }

    /// Makes the approval's child account usable, on the caller's
    /// transaction. A direct signup gets a new active child account keyed on
    /// the approval; an invite activates the pending account created when the
    /// code was redeemed.
    pub(crate) async fn admit_child_in(
        &self,
        conn: &mut SqliteConnection,
        approval: &ParentApproval,
    ) -> Result<Account, AccountServiceError> {
        match approval.context {
            ApprovalContext::InviteFlow => {
                let child_id = approval
                    .child_id
                    .ok_or(AccountServiceError::AccountNotFound)?;
                let mut account = find_by_id_in(conn, child_id)
                    .await?
                    .ok_or(AccountServiceError::AccountNotFound)?;
                if account.role != AccountRole::Child {
                    return Err(AccountServiceError::IncompatibleRole(account.role));
                }
                if !account.is_active() {
                    set_status_in(conn, account.id, AccountStatus::Active).await?;
                    account.status = AccountStatus::Active;
                }
                Ok(account)
            }
            ApprovalContext::DirectSignup => {
                if let Some(existing) = find_by_origin_approval_in(conn, approval.id).await? {
                    return Ok(existing);
                }

                let child = NewAccount {
                    email: None,
                    first_name: approval.child_first_name.clone(),
                    last_name: approval.child_last_name.clone(),
                    birthdate: Some(approval.child_birthdate.clone()),
                    role: AccountRole::Child,
                    status: AccountStatus::Active,
                    password_hash: None,
                    origin_approval_id: Some(approval.id),
                };
                Ok(insert_account_in(conn, &child, self.clock.now_ts()).await?)
            }
        }
    }

    /// Creates a child account that waits for parent approval before it can
    /// be used.
    pub(crate) async fn create_pending_child_in(
        &self,
        conn: &mut SqliteConnection,
        profile: &ChildProfile,
    ) -> Result<Account, AccountServiceError> {
        let child = NewAccount {
            email: None,
            first_name: profile.first_name.trim().to_string(),
            last_name: profile.last_name.trim().to_string(),
            birthdate: Some(profile.birthdate_string()),
            role: AccountRole::Child,
            status: AccountStatus::Pending,
            password_hash: None,
            origin_approval_id: None,
        };

        Ok(insert_account_in(conn, &child, self.clock.now_ts()).await?)
    }
}

pub fn validate_email(email: &str) -> Result<(), AccountServiceError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') || email.len() > 255 {
        return Err(AccountServiceError::InvalidEmail);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AccountServiceError> {
    if password.len() < 8 {
        return Err(AccountServiceError::WeakPassword);
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, AccountServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountServiceError::HashingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::repositories::account_repository::MockAccountRepository;
    use mockall::predicate::*;

    fn account(id: i64, role: AccountRole) -> Account {
        Account {
            id,
            email: Some("parent@example.com".to_string()),
            first_name: "Pat".to_string(),
            last_name: "Doe".to_string(),
            birthdate: None,
            role,
            status: AccountStatus::Active,
            password_hash: None,
            origin_approval_id: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn adult_is_promoted_in_place() {
        let mut repo = MockAccountRepository::new();
        let adult = account(5, AccountRole::Adult);
        repo.expect_find_by_email()
            .with(eq("parent@example.com"))
            .times(1)
            .returning(move |_| {
                let adult = adult.clone();
                Box::pin(async move { Ok(Some(adult)) })
            });
        repo.expect_promote_to_parent()
            .with(eq(5))
            .times(1)
            .returning(|_| Box::pin(async { Ok(true) }));
        repo.expect_create_account().never();

        let service = AccountService::new(Arc::new(repo), Arc::new(SystemClock));
        let resolved = service
            .resolve_parent("parent@example.com", None)
            .await
            .expect("resolved");

        assert_eq!(resolved.account.id, 5);
        assert_eq!(resolved.account.role, AccountRole::Parent);
        assert!(resolved.promoted);
        assert!(!resolved.created);
    }

    #[tokio::test]
    async fn child_account_cannot_become_parent() {
        let mut repo = MockAccountRepository::new();
        let child = account(9, AccountRole::Child);
        repo.expect_find_by_email().returning(move |_| {
            let child = child.clone();
            Box::pin(async move { Ok(Some(child)) })
        });
        repo.expect_promote_to_parent().never();

        let service = AccountService::new(Arc::new(repo), Arc::new(SystemClock));
        let result = service.resolve_parent("parent@example.com", None).await;

        assert!(matches!(
            result,
            Err(AccountServiceError::IncompatibleRole(AccountRole::Child))
        ));
    }

    #[tokio::test]
    async fn unknown_email_without_signup_is_rejected() {
        let mut repo = MockAccountRepository::new();
        repo.expect_find_by_email()
            .returning(|_| Box::pin(async { Ok(None) }));

        let service = AccountService::new(Arc::new(repo), Arc::new(SystemClock));
        let result = service.resolve_parent("new@example.com", None).await;

        assert!(matches!(result, Err(AccountServiceError::SignupRequired)));
    }
}
