use crate::clock::Clock;
use crate::config::workflow::WorkflowConfig;
use crate::models::{ConsumedToken, IssuedToken, Token, TokenKind};
use chrono::Duration;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// 32 bytes of OS randomness per secret.
const SECRET_BYTES: usize = 32;

const TOKEN_COLUMNS: &str =
    "id, kind, secret_hash, subject_id, context_id, issued_at, expires_at, consumed_at";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,
    #[error("Token already used")]
    AlreadyUsed,
    #[error("Token expired")]
    Expired,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TokenError {
    /// Short machine-readable reason for audit logs.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::NotFound => "not_found",
            TokenError::AlreadyUsed => "already_used",
            TokenError::Expired => "expired",
            TokenError::Database(_) => "database",
        }
    }
}

/// Issues and redeems single-use secret tokens of every kind.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
}

impl TokenStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, config: WorkflowConfig) -> Self {
        Self {
            pool,
            clock,
            config,
        }
    }

    fn generate_secret() -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// SHA-256 hex digest; the only form of a secret that is ever stored.
    pub fn hash_secret(raw_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_secret.trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Issues a token bound to `subject_id`. A `None` ttl uses the configured
    /// lifetime for the kind.
    pub async fn issue(
        &self,
        kind: TokenKind,
        subject_id: i64,
        context_id: Option<i64>,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken, TokenError> {
        let raw_secret = Self::generate_secret();
        let secret_hash = Self::hash_secret(&raw_secret);
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let expires_at = now + ttl.unwrap_or_else(|| self.config.ttl_for(kind));

        sqlx::query(
            r#"
            INSERT INTO tokens (id, kind, secret_hash, subject_id, context_id, issued_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(kind)
        .bind(&secret_hash)
        .bind(subject_id)
        .bind(context_id)
        .bind(now.timestamp())
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await?;

        tracing::debug!(token_id = %id, %kind, subject_id, "issued token");

        Ok(IssuedToken {
            id,
            raw_secret,
            expires_at,
        })
    }

    /// Redeems a token exactly once.
    ///
    /// The check and the write are a single conditional update, so of any
    /// number of concurrent redemptions only one sees a row come back. The
    /// losers are classified afterwards by re-reading the row.
    pub async fn consume(
        &self,
        kind: TokenKind,
        raw_secret: &str,
        expected_context: Option<i64>,
    ) -> Result<ConsumedToken, TokenError> {
        let mut conn = self.pool.acquire().await?;
        self.consume_in(&mut conn, kind, raw_secret, expected_context)
            .await
    }

    /// [`consume`](Self::consume) on a caller-owned connection, so the
    /// redemption rolls back with the caller's transaction.
    pub(crate) async fn consume_in(
        &self,
        conn: &mut SqliteConnection,
        kind: TokenKind,
        raw_secret: &str,
        expected_context: Option<i64>,
    ) -> Result<ConsumedToken, TokenError> {
        let secret_hash = Self::hash_secret(raw_secret);
        let now = self.clock.now_ts();

        let consumed = sqlx::query_as::<_, (String, i64, Option<i64>)>(
            r#"
            UPDATE tokens
            SET consumed_at = ?
            WHERE secret_hash = ?
              AND kind = ?
              AND consumed_at IS NULL
              AND expires_at >= ?
              AND (? IS NULL OR context_id = ?)
            RETURNING id, subject_id, context_id
            "#,
        )
        .bind(now)
        .bind(&secret_hash)
        .bind(kind)
        .bind(now)
        .bind(expected_context)
        .bind(expected_context)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((token_id, subject_id, context_id)) = consumed {
            tracing::info!(%token_id, %kind, subject_id, "token consumed");
            return Ok(ConsumedToken {
                token_id,
                subject_id,
                context_id,
            });
        }

        let error = match find_by_hash(conn, kind, &secret_hash).await? {
            None => TokenError::NotFound,
            Some(token)
                if expected_context.is_some() && token.context_id != expected_context =>
            {
                TokenError::NotFound
            }
            Some(token) if token.is_expired_at(now) => TokenError::Expired,
            Some(token) if token.is_consumed() => TokenError::AlreadyUsed,
            Some(_) => TokenError::NotFound,
        };

        tracing::warn!(%kind, reason = error.reason(), "token redemption rejected");
        Err(error)
    }

    /// Read-only lookup of the token a secret refers to.
    pub async fn peek(
        &self,
        kind: TokenKind,
        raw_secret: &str,
    ) -> Result<Option<Token>, TokenError> {
        let mut conn = self.pool.acquire().await?;
        find_by_hash(&mut conn, kind, &Self::hash_secret(raw_secret)).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Token>, TokenError> {
        let token = sqlx::query_as::<_, Token>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// Deletes every token that expired before `now`. Storage reclamation
    /// only; expired tokens are already unusable.
    pub async fn sweep(&self, now: i64) -> Result<u64, TokenError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!("Swept {} expired tokens", removed);
        }

        Ok(removed)
    }

    pub async fn sweep_expired(&self) -> Result<u64, TokenError> {
        self.sweep(self.clock.now_ts()).await
    }
}

async fn find_by_hash(
    conn: &mut SqliteConnection,
    kind: TokenKind,
    secret_hash: &str,
) -> Result<Option<Token>, TokenError> {
    let token = sqlx::query_as::<_, Token>(&format!(
        "SELECT {TOKEN_COLUMNS} FROM tokens WHERE secret_hash = ? AND kind = ?"
    ))
    .bind(secret_hash)
    .bind(kind)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(token)
}
