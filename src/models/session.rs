use crate::clock::from_timestamp;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated caller, handed to operations explicitly by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl Session {
    pub fn issue(user_id: i64, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            user_id,
            issued_at: now.timestamp(),
            expires_at: (now + lifetime).timestamp(),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() <= self.expires_at
    }

    pub fn expires_at_time(&self) -> DateTime<Utc> {
        from_timestamp(self.expires_at)
    }
}
