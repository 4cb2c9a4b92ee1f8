pub mod test_helpers {
    use crate::services::email_service::{EmailError, EmailSender};
    use async_trait::async_trait;
    use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Create a temporary file-based SQLite database for testing
    /// Several connections share it, so concurrent writers really race.
    pub async fn create_test_db_file() -> Result<(SqlitePool, NamedTempFile), sqlx::Error> {
        let temp_file = NamedTempFile::new().map_err(sqlx::Error::Io)?;
        let db_path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| sqlx::Error::Configuration("Invalid database path".into()))?;
        let database_url = format!("sqlite://{}", db_path);

        let pool = crate::db::connect(&database_url, 5).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok((pool, temp_file))
    }

    /// Insert an active account with the given role and no password
    pub async fn insert_account(
        pool: &SqlitePool,
        email: Option<&str>,
        role: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (email, first_name, last_name, role, status, created_at)
            VALUES (?, 'Test', 'Account', ?, 'active', strftime('%s', 'now'))
            "#,
        )
        .bind(email.map(str::to_lowercase))
        .bind(role)
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentEmail {
        pub to: String,
        pub subject: String,
        pub html: String,
    }

    /// Keeps every message it is asked to send.
    #[derive(Default)]
    pub struct RecordingEmailSender {
        sent: Mutex<Vec<SentEmail>>,
    }

    impl RecordingEmailSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<SentEmail> {
            self.sent
                .lock()
                .map(|sent| sent.clone())
                .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
        }

        /// Secret embedded after `path` (e.g. `/parent/approve/`) in the most
        /// recent message that contains it.
        pub fn last_secret_after(&self, path: &str) -> Option<String> {
            self.sent().iter().rev().find_map(|email| {
                let start = email.html.find(path)? + path.len();
                let secret: String = email.html[start..]
                    .chars()
                    .take_while(|c| c.is_ascii_hexdigit())
                    .collect();
                (!secret.is_empty()).then_some(secret)
            })
        }
    }

    #[async_trait]
    impl EmailSender for RecordingEmailSender {
        async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
            let email = SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
            };
            match self.sent.lock() {
                Ok(mut sent) => sent.push(email),
                Err(poisoned) => poisoned.into_inner().push(email),
            }
            Ok(())
        }
    }

    /// Fails every delivery.
    #[derive(Default)]
    pub struct FailingEmailSender;

    #[async_trait]
    impl EmailSender for FailingEmailSender {
        async fn send(&self, _to: &str, _subject: &str, _html: &str) -> Result<(), EmailError> {
            Err(EmailError::SendFailed("smtp unavailable".to_string()))
        }
    }
}

// Re-export commonly used test functions at module level for convenience
// Note: This is test-only code. Panic on error is acceptable in tests.
#[cfg(test)]
pub async fn create_test_pool() -> sqlx::SqlitePool {
    match test_helpers::create_test_db().await {
        Ok(pool) => pool,
        Err(e) => panic!("Failed to create test pool: {}", e),
    }
}
