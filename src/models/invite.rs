use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invite {
    pub id: i64,
    pub inviter_id: i64,
    pub cliq_id: i64,
    pub invitee_email: Option<String>,
    pub created_at: i64,
    pub redeemed_by: Option<i64>,
    pub redeemed_at: Option<i64>,
}
