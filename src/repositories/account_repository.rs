use crate::models::{Account, AccountStatus, NewAccount};
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Record already exists")]
    AlreadyExists,
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

pub(crate) fn map_insert_error(e: sqlx::Error) -> RepositoryError {
    if e.to_string().contains("UNIQUE") {
        RepositoryError::AlreadyExists
    } else {
        RepositoryError::Database(e)
    }
}

const ACCOUNT_COLUMNS: &str = r#"
    id, email, first_name, last_name, birthdate, role, status,
    password_hash, origin_approval_id, created_at
"#;

#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait AccountRepository: Send + Sync {
    async fn create_account(&self, account: NewAccount, created_at: i64)
        -> RepositoryResult<Account>;
    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<Account>>;
    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<Account>>;
    /// Flips an `adult` account to `parent`. Returns false when the row was
    /// not an adult at the time of the write.
    async fn promote_to_parent(&self, id: i64) -> RepositoryResult<bool>;
}

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn create_account(
        &self,
        account: NewAccount,
        created_at: i64,
    ) -> RepositoryResult<Account> {
        let mut conn = self.pool.acquire().await?;
        insert_account_in(&mut conn, &account, created_at).await
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<Account>> {
        let normalized = email.trim().to_lowercase();
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"
        ))
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<Account>> {
        let mut conn = self.pool.acquire().await?;
        find_by_id_in(&mut conn, id).await
    }

    async fn promote_to_parent(&self, id: i64) -> RepositoryResult<bool> {
        let result =
            sqlx::query("UPDATE accounts SET role = 'parent' WHERE id = ? AND role = 'adult'")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }
}

// Connection-level statements, shared by the repository and by services
// that write accounts inside a larger transaction.

pub(crate) async fn insert_account_in(
    conn: &mut SqliteConnection,
    account: &NewAccount,
    created_at: i64,
) -> RepositoryResult<Account> {
    let email = account.email.as_deref().map(|e| e.trim().to_lowercase());
    let result = sqlx::query(
        r#"
        INSERT INTO accounts
            (email, first_name, last_name, birthdate, role, status,
             password_hash, origin_approval_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(email)
    .bind(&account.first_name)
    .bind(&account.last_name)
    .bind(&account.birthdate)
    .bind(account.role)
    .bind(account.status)
    .bind(&account.password_hash)
    .bind(account.origin_approval_id)
    .bind(created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_insert_error)?;

    find_by_id_in(conn, result.last_insert_rowid())
        .await?
        .ok_or(RepositoryError::NotFound)
}

pub(crate) async fn find_by_id_in(
    conn: &mut SqliteConnection,
    id: i64,
) -> RepositoryResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(account)
}

pub(crate) async fn find_by_origin_approval_in(
    conn: &mut SqliteConnection,
    approval_id: i64,
) -> RepositoryResult<Option<Account>> {
    let account = sqlx::query_as::<_, Account>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE origin_approval_id = ?"
    ))
    .bind(approval_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(account)
}

pub(crate) async fn set_status_in(
    conn: &mut SqliteConnection,
    id: i64,
    status: AccountStatus,
) -> RepositoryResult<()> {
    let result = sqlx::query("UPDATE accounts SET status = ? WHERE id = ?")
        .bind(status)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }

    Ok(())
}
