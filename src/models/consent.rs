use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParentConsent {
    pub id: i64,
    pub parent_id: i64,
    pub child_id: i64,
    pub red_alert_accepted: bool,
    pub silent_monitoring_enabled: bool,
    pub consent_timestamp: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A parent's acknowledgements as submitted, before they are stamped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentInput {
    pub red_alert_accepted: bool,
    pub silent_monitoring_enabled: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParentLinkRole {
    Primary,
    Secondary,
    Guardian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPermissions {
    pub can_manage_child: bool,
    pub can_change_settings: bool,
    pub can_view_activity: bool,
    pub receives_notifications: bool,
}

impl LinkPermissions {
    pub fn full() -> Self {
        Self {
            can_manage_child: true,
            can_change_settings: true,
            can_view_activity: true,
            receives_notifications: true,
        }
    }

    pub fn view_only() -> Self {
        Self {
            can_manage_child: false,
            can_change_settings: false,
            can_view_activity: true,
            receives_notifications: true,
        }
    }

    pub fn for_role(role: ParentLinkRole) -> Self {
        match role {
            ParentLinkRole::Primary | ParentLinkRole::Guardian => Self::full(),
            ParentLinkRole::Secondary => Self::view_only(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParentLink {
    pub id: i64,
    pub parent_id: i64,
    pub child_id: i64,
    pub role: ParentLinkRole,
    pub can_manage_child: bool,
    pub can_change_settings: bool,
    pub can_view_activity: bool,
    pub receives_notifications: bool,
    pub created_at: i64,
}

impl ParentLink {
    pub fn permissions(&self) -> LinkPermissions {
        LinkPermissions {
            can_manage_child: self.can_manage_child,
            can_change_settings: self.can_change_settings,
            can_view_activity: self.can_view_activity,
            receives_notifications: self.receives_notifications,
        }
    }
}
