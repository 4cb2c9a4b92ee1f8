use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Adult,
    Parent,
    Child,
    Admin,
}

/// Outcome of asking an existing account to act as a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentUpgrade {
    /// Account is already a parent and is reused as-is.
    AlreadyParent,
    /// Adult account that must be flipped to `Parent` in place.
    Promote,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Adult => "adult",
            AccountRole::Parent => "parent",
            AccountRole::Child => "child",
            AccountRole::Admin => "admin",
        }
    }

    /// Adult -> Parent is the only upgrade; children and admins can never
    /// take on a parent role.
    pub fn upgrade_to_parent(self) -> Result<ParentUpgrade, AccountRole> {
        match self {
            AccountRole::Adult => Ok(ParentUpgrade::Promote),
            AccountRole::Parent => Ok(ParentUpgrade::AlreadyParent),
            AccountRole::Child => Err(self),
            AccountRole::Admin => Err(self),
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<String>,
    pub role: AccountRole,
    pub status: AccountStatus,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub origin_approval_id: Option<i64>,
    pub created_at: i64,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Identity details of a child collected at signup or invite time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProfile {
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
}

impl ChildProfile {
    pub fn birthdate_string(&self) -> String {
        self.birthdate.format("%Y-%m-%d").to_string()
    }
}

/// Fields for a brand-new account row.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<String>,
    pub role: AccountRole,
    pub status: AccountStatus,
    pub password_hash: Option<String>,
    pub origin_approval_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_adults_are_promoted() {
        assert_eq!(
            AccountRole::Adult.upgrade_to_parent(),
            Ok(ParentUpgrade::Promote)
        );
        assert_eq!(
            AccountRole::Parent.upgrade_to_parent(),
            Ok(ParentUpgrade::AlreadyParent)
        );
        assert_eq!(
            AccountRole::Child.upgrade_to_parent(),
            Err(AccountRole::Child)
        );
        assert_eq!(
            AccountRole::Admin.upgrade_to_parent(),
            Err(AccountRole::Admin)
        );
    }
}
