use crate::models::{ApprovalUpdate, NewApproval, ParentApproval};
use crate::repositories::account_repository::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

const APPROVAL_COLUMNS: &str = r#"
    id, child_first_name, child_last_name, child_birthdate, parent_email, context,
    invite_id, cliq_id, existing_parent_id, child_id, parent_id, token_id, status,
    parent_state, created_at, expires_at, approved_at, declined_at
"#;

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Inserts the approval unless a pending, unexpired approval already
    /// exists for the same parent email and child name. Returns `None` when
    /// such a duplicate blocked the insert.
    async fn insert_unless_duplicate(
        &self,
        approval: NewApproval,
    ) -> RepositoryResult<Option<ParentApproval>>;
    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<ParentApproval>>;
    async fn list_by_parent_email(&self, email: &str) -> RepositoryResult<Vec<ParentApproval>>;
    async fn list_started_for_parent(&self, parent_id: i64)
        -> RepositoryResult<Vec<ParentApproval>>;
    /// Applies one update. Returns false when the row no longer qualifies,
    /// e.g. a status change on an approval that is not pending any more.
    async fn apply_update(&self, id: i64, update: ApprovalUpdate) -> RepositoryResult<bool>;
}

pub struct SqliteApprovalRepository {
    pool: SqlitePool,
}

impl SqliteApprovalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalRepository for SqliteApprovalRepository {
    async fn insert_unless_duplicate(
        &self,
        approval: NewApproval,
    ) -> RepositoryResult<Option<ParentApproval>> {
        let mut conn = self.pool.acquire().await?;
        insert_unless_duplicate_in(&mut conn, &approval).await
    }

    async fn find_by_id(&self, id: i64) -> RepositoryResult<Option<ParentApproval>> {
        let mut conn = self.pool.acquire().await?;
        find_by_id_in(&mut conn, id).await
    }

    async fn list_by_parent_email(&self, email: &str) -> RepositoryResult<Vec<ParentApproval>> {
        let approvals = sqlx::query_as::<_, ParentApproval>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM parent_approvals
             WHERE parent_email = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        Ok(approvals)
    }

    async fn list_started_for_parent(
        &self,
        parent_id: i64,
    ) -> RepositoryResult<Vec<ParentApproval>> {
        let approvals = sqlx::query_as::<_, ParentApproval>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM parent_approvals
             WHERE parent_id = ? AND status = 'approved' AND parent_state = 'started'
             ORDER BY approved_at ASC, id ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(approvals)
    }

    async fn apply_update(&self, id: i64, update: ApprovalUpdate) -> RepositoryResult<bool> {
        let mut conn = self.pool.acquire().await?;
        apply_update_in(&mut conn, id, update).await
    }
}

pub(crate) async fn insert_unless_duplicate_in(
    conn: &mut SqliteConnection,
    approval: &NewApproval,
) -> RepositoryResult<Option<ParentApproval>> {
    let parent_email = approval.parent_email.trim().to_lowercase();

    // Duplicate check and insert run as one statement so two concurrent
    // requests for the same child cannot both get through.
    let result = sqlx::query(
        r#"
        INSERT INTO parent_approvals
            (child_first_name, child_last_name, child_birthdate, parent_email, context,
             invite_id, cliq_id, existing_parent_id, child_id, status, created_at, expires_at)
        SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM parent_approvals
            WHERE parent_email = ?
              AND lower(child_first_name) = lower(?)
              AND lower(child_last_name) = lower(?)
              AND status = 'pending'
              AND expires_at >= ?
        )
        "#,
    )
    .bind(&approval.child_first_name)
    .bind(&approval.child_last_name)
    .bind(&approval.child_birthdate)
    .bind(&parent_email)
    .bind(approval.context)
    .bind(approval.invite_id)
    .bind(approval.cliq_id)
    .bind(approval.existing_parent_id)
    .bind(approval.child_id)
    .bind(approval.created_at)
    .bind(approval.expires_at)
    .bind(&parent_email)
    .bind(&approval.child_first_name)
    .bind(&approval.child_last_name)
    .bind(approval.created_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    find_by_id_in(conn, result.last_insert_rowid())
        .await?
        .map(Some)
        .ok_or(RepositoryError::NotFound)
}

pub(crate) async fn find_by_id_in(
    conn: &mut SqliteConnection,
    id: i64,
) -> RepositoryResult<Option<ParentApproval>> {
    let approval = sqlx::query_as::<_, ParentApproval>(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM parent_approvals WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(approval)
}

pub(crate) async fn apply_update_in(
    conn: &mut SqliteConnection,
    id: i64,
    update: ApprovalUpdate,
) -> RepositoryResult<bool> {
    let result = match update {
        ApprovalUpdate::BindToken { token_id } => {
            sqlx::query("UPDATE parent_approvals SET token_id = ? WHERE id = ?")
                .bind(token_id)
                .bind(id)
                .execute(&mut *conn)
                .await?
        }
        ApprovalUpdate::Approve {
            parent_id,
            approved_at,
        } => {
            sqlx::query(
                r#"
                UPDATE parent_approvals
                SET status = 'approved', approved_at = ?, parent_id = ?
                WHERE id = ? AND status = 'pending' AND expires_at >= ?
                "#,
            )
            .bind(approved_at)
            .bind(parent_id)
            .bind(id)
            .bind(approved_at)
            .execute(&mut *conn)
            .await?
        }
        ApprovalUpdate::RecordAdmission {
            child_id,
            parent_state,
        } => {
            sqlx::query(
                "UPDATE parent_approvals SET child_id = ?, parent_state = ?
                 WHERE id = ? AND status = 'approved'",
            )
            .bind(child_id)
            .bind(parent_state)
            .bind(id)
            .execute(&mut *conn)
            .await?
        }
        ApprovalUpdate::Decline { declined_at } => {
            sqlx::query(
                r#"
                UPDATE parent_approvals
                SET status = 'declined', declined_at = ?
                WHERE id = ? AND status = 'pending' AND expires_at >= ?
                "#,
            )
            .bind(declined_at)
            .bind(id)
            .bind(declined_at)
            .execute(&mut *conn)
            .await?
        }
        ApprovalUpdate::CompleteParentState => {
            sqlx::query(
                "UPDATE parent_approvals SET parent_state = 'completed'
                 WHERE id = ? AND status = 'approved' AND parent_state = 'started'",
            )
            .bind(id)
            .execute(&mut *conn)
            .await?
        }
    };

    Ok(result.rows_affected() == 1)
}
