use crate::models::TokenKind;
use chrono::Duration;
use std::env;
use tracing::warn;

/// Lifetimes and links used by the onboarding workflow.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub base_url: String,
    pub magic_link_ttl: Duration,
    pub approval_ttl: Duration,
    pub invite_ttl: Duration,
    pub session_lifetime: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            magic_link_ttl: TokenKind::MagicLink.default_ttl(),
            approval_ttl: TokenKind::ApprovalLink.default_ttl(),
            invite_ttl: TokenKind::InviteCode.default_ttl(),
            session_lifetime: Duration::days(7),
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            base_url: env::var("BASE_URL").unwrap_or(defaults.base_url),
            magic_link_ttl: env_i64("MAGIC_LINK_TTL_MINUTES")
                .map(Duration::minutes)
                .unwrap_or(defaults.magic_link_ttl),
            approval_ttl: env_i64("APPROVAL_TTL_DAYS")
                .map(Duration::days)
                .unwrap_or(defaults.approval_ttl),
            invite_ttl: env_i64("INVITE_TTL_DAYS")
                .map(Duration::days)
                .unwrap_or(defaults.invite_ttl),
            session_lifetime: env_i64("SESSION_LIFETIME_HOURS")
                .map(Duration::hours)
                .unwrap_or(defaults.session_lifetime),
        }
    }

    pub fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::MagicLink => self.magic_link_ttl,
            TokenKind::ApprovalLink => self.approval_ttl,
            TokenKind::InviteCode => self.invite_ttl,
        }
    }

    pub fn approval_url(&self, raw_secret: &str) -> String {
        format!("{}/parent/approve/{}", self.base_url, raw_secret)
    }

    pub fn magic_link_url(&self, raw_secret: &str) -> String {
        format!("{}/auth/magic/{}", self.base_url, raw_secret)
    }

    pub fn invite_url(&self, raw_secret: &str) -> String {
        format!("{}/invite/{}", self.base_url, raw_secret)
    }
}

fn env_i64(key: &str) -> Option<i64> {
    let raw = env::var(key).ok()?;
    match raw.parse::<i64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!("Ignoring invalid {} value: {}", key, raw);
            None
        }
    }
}
