use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub owner_id: i64,
    pub max_members: i64,
    /// Cached count of active memberships, rewritten by every seat mutation.
    pub current_members: i64,
    pub is_group_plan: bool,
    pub billing_cycle: BillingCycle,
    pub stripe_subscription_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Plan {
    pub fn slots_remaining(&self) -> i64 {
        (self.max_members - self.current_members).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Parent,
    Child,
    Member,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Pending,
    Removed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub member_id: i64,
    pub plan_id: i64,
    pub role: MembershipRole,
    pub status: MembershipStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAvailability {
    pub available: bool,
    pub slots_remaining: i64,
    pub max_members: i64,
    pub current_members: i64,
}

impl SeatAvailability {
    pub fn new(max_members: i64, current_members: i64) -> Self {
        let slots_remaining = (max_members - current_members).max(0);
        Self {
            available: slots_remaining > 0,
            slots_remaining,
            max_members,
            current_members,
        }
    }
}

impl From<&Plan> for SeatAvailability {
    fn from(plan: &Plan) -> Self {
        Self::new(plan.max_members, plan.current_members)
    }
}
