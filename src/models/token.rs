use crate::clock::from_timestamp;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    MagicLink,
    ApprovalLink,
    InviteCode,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::MagicLink => "magic_link",
            TokenKind::ApprovalLink => "approval_link",
            TokenKind::InviteCode => "invite_code",
        }
    }

    /// Magic links are a live login path and stay short; the other kinds wait
    /// on a parent acting on an email.
    pub fn default_ttl(&self) -> Duration {
        match self {
            TokenKind::MagicLink => Duration::minutes(15),
            TokenKind::ApprovalLink | TokenKind::InviteCode => Duration::days(7),
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored token metadata. The raw secret never appears here.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Token {
    pub id: String,
    pub kind: TokenKind,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub subject_id: i64,
    pub context_id: Option<i64>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
}

impl Token {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn expires_at_time(&self) -> DateTime<Utc> {
        from_timestamp(self.expires_at)
    }
}

/// Returned once at issuance; the only place the raw secret exists.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub id: String,
    pub raw_secret: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedToken {
    pub token_id: String,
    pub subject_id: i64,
    pub context_id: Option<i64>,
}
