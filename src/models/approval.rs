use crate::clock::from_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Declined,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Declined => "declined",
            ApprovalStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalContext {
    InviteFlow,
    DirectSignup,
}

/// Where the approving parent is in onboarding once the approval lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParentState {
    /// Approved, but the parent has no plan yet so the child's seat is deferred.
    Started,
    /// Child holds a seat on the parent's plan.
    Completed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParentApproval {
    pub id: i64,
    pub child_first_name: String,
    pub child_last_name: String,
    pub child_birthdate: String,
    pub parent_email: String,
    pub context: ApprovalContext,
    pub invite_id: Option<i64>,
    pub cliq_id: Option<i64>,
    pub existing_parent_id: Option<i64>,
    pub child_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub token_id: Option<String>,
    pub status: ApprovalStatus,
    pub parent_state: Option<ParentState>,
    pub created_at: i64,
    pub expires_at: i64,
    pub approved_at: Option<i64>,
    pub declined_at: Option<i64>,
}

impl ParentApproval {
    /// Status as seen by readers: a pending approval past its deadline is
    /// expired even though no write has recorded it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ApprovalStatus {
        match self.status {
            ApprovalStatus::Pending if now.timestamp() > self.expires_at => {
                ApprovalStatus::Expired
            }
            status => status,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ApprovalStatus::Pending
    }

    pub fn expires_at_time(&self) -> DateTime<Utc> {
        from_timestamp(self.expires_at)
    }

    /// Returns the approval with its effective status written in, for callers
    /// that only display it.
    pub fn with_effective_status(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }
}

/// Fields needed to open a new approval.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub child_first_name: String,
    pub child_last_name: String,
    pub child_birthdate: String,
    pub parent_email: String,
    pub context: ApprovalContext,
    pub invite_id: Option<i64>,
    pub cliq_id: Option<i64>,
    pub existing_parent_id: Option<i64>,
    pub child_id: Option<i64>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Every mutation an approval row can receive. Status-changing variants are
/// applied only while the row is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalUpdate {
    BindToken {
        token_id: String,
    },
    /// Claims a pending approval for `parent_id`.
    Approve {
        parent_id: i64,
        approved_at: i64,
    },
    /// Records the child and plan outcome of an approval claimed in the same
    /// transaction.
    RecordAdmission {
        child_id: i64,
        parent_state: ParentState,
    },
    Decline {
        declined_at: i64,
    },
    CompleteParentState,
}
