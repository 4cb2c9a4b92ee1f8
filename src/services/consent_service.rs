use crate::clock::Clock;
use crate::models::{
    ConsentInput, LinkPermissions, ParentConsent, ParentLink, ParentLinkRole, Session,
};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

const CONSENT_COLUMNS: &str = r#"
    id, parent_id, child_id, red_alert_accepted, silent_monitoring_enabled,
    consent_timestamp, ip_address, user_agent
"#;

const LINK_COLUMNS: &str = r#"
    id, parent_id, child_id, role, can_manage_child, can_change_settings,
    can_view_activity, receives_notifications, created_at
"#;

#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("Red Alert agreement must be accepted")]
    ConsentNotAccepted,
    #[error("Not authorized for this child")]
    NotAuthorized,
    #[error("Parent link not found")]
    LinkNotFound,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Consent ledger and parent-link registry.
#[derive(Clone)]
pub struct ConsentService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ConsentService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Records the consent given while approving a child. The Red Alert
    /// agreement is mandatory here.
    pub async fn record_consent(
        &self,
        parent_id: i64,
        child_id: i64,
        input: &ConsentInput,
    ) -> Result<ParentConsent, ConsentError> {
        let mut conn = self.pool.acquire().await?;
        self.record_consent_in(&mut conn, parent_id, child_id, input)
            .await
    }

    pub(crate) async fn record_consent_in(
        &self,
        conn: &mut SqliteConnection,
        parent_id: i64,
        child_id: i64,
        input: &ConsentInput,
    ) -> Result<ParentConsent, ConsentError> {
        if !input.red_alert_accepted {
            return Err(ConsentError::ConsentNotAccepted);
        }
        self.upsert_consent(conn, parent_id, child_id, input).await
    }

    /// Re-consent by a parent already linked to the child.
    pub async fn update_consent(
        &self,
        session: &Session,
        child_id: i64,
        input: &ConsentInput,
    ) -> Result<ParentConsent, ConsentError> {
        self.require_active(session)?;
        if self.link(session.user_id, child_id).await?.is_none() {
            tracing::warn!(
                "Account {} tried to update consent for unlinked child {}",
                session.user_id,
                child_id
            );
            return Err(ConsentError::NotAuthorized);
        }
        let mut conn = self.pool.acquire().await?;
        self.upsert_consent(&mut conn, session.user_id, child_id, input)
            .await
    }

    async fn upsert_consent(
        &self,
        conn: &mut SqliteConnection,
        parent_id: i64,
        child_id: i64,
        input: &ConsentInput,
    ) -> Result<ParentConsent, ConsentError> {
        let consent = sqlx::query_as::<_, ParentConsent>(&format!(
            r#"
            INSERT INTO parent_consents
                (parent_id, child_id, red_alert_accepted, silent_monitoring_enabled,
                 consent_timestamp, ip_address, user_agent)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(parent_id, child_id) DO UPDATE SET
                red_alert_accepted = excluded.red_alert_accepted,
                silent_monitoring_enabled = excluded.silent_monitoring_enabled,
                consent_timestamp = excluded.consent_timestamp,
                ip_address = excluded.ip_address,
                user_agent = excluded.user_agent
            RETURNING {CONSENT_COLUMNS}
            "#
        ))
        .bind(parent_id)
        .bind(child_id)
        .bind(input.red_alert_accepted)
        .bind(input.silent_monitoring_enabled)
        .bind(self.clock.now_ts())
        .bind(&input.ip_address)
        .bind(&input.user_agent)
        .fetch_one(&mut *conn)
        .await?;

        tracing::info!(
            "Consent recorded for parent {} / child {} (red alert: {}, silent monitoring: {})",
            parent_id,
            child_id,
            consent.red_alert_accepted,
            consent.silent_monitoring_enabled
        );

        Ok(consent)
    }

    pub async fn consent(
        &self,
        parent_id: i64,
        child_id: i64,
    ) -> Result<Option<ParentConsent>, ConsentError> {
        let consent = sqlx::query_as::<_, ParentConsent>(&format!(
            "SELECT {CONSENT_COLUMNS} FROM parent_consents WHERE parent_id = ? AND child_id = ?"
        ))
        .bind(parent_id)
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(consent)
    }

    /// A child may interact only while at least one linked parent has the
    /// Red Alert agreement accepted.
    pub async fn can_child_interact(&self, child_id: i64) -> Result<bool, ConsentError> {
        let allowed = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM parent_consents c
                JOIN parent_links l
                  ON l.parent_id = c.parent_id AND l.child_id = c.child_id
                WHERE c.child_id = ? AND c.red_alert_accepted = 1
            )
            "#,
        )
        .bind(child_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(allowed)
    }

    /// Links a parent to a child. Linking an existing pair returns the
    /// existing link untouched.
    pub async fn link_parent(
        &self,
        parent_id: i64,
        child_id: i64,
        role: ParentLinkRole,
        permissions: LinkPermissions,
    ) -> Result<ParentLink, ConsentError> {
        let mut conn = self.pool.acquire().await?;
        self.link_parent_in(&mut conn, parent_id, child_id, role, permissions)
            .await
    }

    pub(crate) async fn link_parent_in(
        &self,
        conn: &mut SqliteConnection,
        parent_id: i64,
        child_id: i64,
        role: ParentLinkRole,
        permissions: LinkPermissions,
    ) -> Result<ParentLink, ConsentError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO parent_links
                (parent_id, child_id, role, can_manage_child, can_change_settings,
                 can_view_activity, receives_notifications, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(parent_id, child_id) DO NOTHING
            "#,
        )
        .bind(parent_id)
        .bind(child_id)
        .bind(role)
        .bind(permissions.can_manage_child)
        .bind(permissions.can_change_settings)
        .bind(permissions.can_view_activity)
        .bind(permissions.receives_notifications)
        .bind(self.clock.now_ts())
        .execute(&mut *conn)
        .await?;

        if inserted.rows_affected() == 1 {
            tracing::info!("Linked parent {} to child {}", parent_id, child_id);
        }

        find_link(conn, parent_id, child_id)
            .await?
            .ok_or(ConsentError::LinkNotFound)
    }

    pub async fn link(
        &self,
        parent_id: i64,
        child_id: i64,
    ) -> Result<Option<ParentLink>, ConsentError> {
        let mut conn = self.pool.acquire().await?;
        find_link(&mut conn, parent_id, child_id).await
    }

    pub async fn links_for_child(&self, child_id: i64) -> Result<Vec<ParentLink>, ConsentError> {
        let links = sqlx::query_as::<_, ParentLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM parent_links WHERE child_id = ? ORDER BY created_at, id"
        ))
        .bind(child_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    pub async fn links_for_parent(&self, parent_id: i64) -> Result<Vec<ParentLink>, ConsentError> {
        let links = sqlx::query_as::<_, ParentLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM parent_links WHERE parent_id = ? ORDER BY created_at, id"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    /// Changes what a linked parent may do. Allowed for the linked parent
    /// themselves or a primary parent of the same child.
    pub async fn update_permissions(
        &self,
        session: &Session,
        parent_id: i64,
        child_id: i64,
        permissions: LinkPermissions,
    ) -> Result<ParentLink, ConsentError> {
        self.require_active(session)?;

        if session.user_id != parent_id {
            let actor = self.link(session.user_id, child_id).await?;
            if !matches!(actor, Some(ref link) if link.role == ParentLinkRole::Primary) {
                return Err(ConsentError::NotAuthorized);
            }
        }

        let link = sqlx::query_as::<_, ParentLink>(&format!(
            r#"
            UPDATE parent_links
            SET can_manage_child = ?, can_change_settings = ?,
                can_view_activity = ?, receives_notifications = ?
            WHERE parent_id = ? AND child_id = ?
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(permissions.can_manage_child)
        .bind(permissions.can_change_settings)
        .bind(permissions.can_view_activity)
        .bind(permissions.receives_notifications)
        .bind(parent_id)
        .bind(child_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ConsentError::LinkNotFound)?;

        Ok(link)
    }

    fn require_active(&self, session: &Session) -> Result<(), ConsentError> {
        if session.is_active_at(self.clock.now()) {
            Ok(())
        } else {
            Err(ConsentError::NotAuthorized)
        }
    }
}

async fn find_link(
    conn: &mut SqliteConnection,
    parent_id: i64,
    child_id: i64,
) -> Result<Option<ParentLink>, ConsentError> {
    let link = sqlx::query_as::<_, ParentLink>(&format!(
        "SELECT {LINK_COLUMNS} FROM parent_links WHERE parent_id = ? AND child_id = ?"
    ))
    .bind(parent_id)
    .bind(child_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::test_utils::{create_test_pool, test_helpers};
    use chrono::{Duration, Utc};

    async fn setup() -> (ConsentService, i64, i64) {
        let pool = create_test_pool().await;
        let parent = test_helpers::insert_account(&pool, Some("p@example.com"), "parent")
            .await
            .expect("parent");
        let child = test_helpers::insert_account(&pool, None, "child")
            .await
            .expect("child");
        (ConsentService::new(pool, Arc::new(SystemClock)), parent, child)
    }

    fn accepted() -> ConsentInput {
        ConsentInput {
            red_alert_accepted: true,
            silent_monitoring_enabled: false,
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn approval_consent_requires_red_alert() {
        let (service, parent, child) = setup().await;
        let result = service
            .record_consent(parent, child, &ConsentInput::default())
            .await;
        assert!(matches!(result, Err(ConsentError::ConsentNotAccepted)));
    }

    #[tokio::test]
    async fn interaction_needs_linked_consent() {
        let (service, parent, child) = setup().await;
        service
            .record_consent(parent, child, &accepted())
            .await
            .expect("consent");
        assert!(!service.can_child_interact(child).await.expect("check"));

        service
            .link_parent(parent, child, ParentLinkRole::Primary, LinkPermissions::full())
            .await
            .expect("link");
        assert!(service.can_child_interact(child).await.expect("check"));
    }

    #[tokio::test]
    async fn reconsent_updates_single_record() {
        let (service, parent, child) = setup().await;
        service
            .link_parent(parent, child, ParentLinkRole::Primary, LinkPermissions::full())
            .await
            .expect("link");
        let first = service
            .record_consent(parent, child, &accepted())
            .await
            .expect("consent");

        let session = Session::issue(parent, Utc::now(), Duration::hours(1));
        let input = ConsentInput {
            silent_monitoring_enabled: true,
            ..accepted()
        };
        let second = service
            .update_consent(&session, child, &input)
            .await
            .expect("re-consent");

        assert_eq!(first.id, second.id);
        assert!(second.silent_monitoring_enabled);
    }

    #[tokio::test]
    async fn unlinked_parent_cannot_reconsent() {
        let (service, parent, child) = setup().await;
        let session = Session::issue(parent, Utc::now(), Duration::hours(1));
        let result = service.update_consent(&session, child, &accepted()).await;
        assert!(matches!(result, Err(ConsentError::NotAuthorized)));
    }

    #[tokio::test]
    async fn linking_twice_keeps_one_link() {
        let (service, parent, child) = setup().await;
        let first = service
            .link_parent(parent, child, ParentLinkRole::Primary, LinkPermissions::full())
            .await
            .expect("link");
        let second = service
            .link_parent(
                parent,
                child,
                ParentLinkRole::Secondary,
                LinkPermissions::view_only(),
            )
            .await
            .expect("link again");

        assert_eq!(first.id, second.id);
        assert_eq!(second.role, ParentLinkRole::Primary);
        assert_eq!(service.links_for_child(child).await.expect("links").len(), 1);
    }

    async fn two_parent_family() -> (ConsentService, i64, i64, i64) {
        let pool = create_test_pool().await;
        let primary = test_helpers::insert_account(&pool, Some("mum@example.com"), "parent")
            .await
            .expect("primary");
        let secondary = test_helpers::insert_account(&pool, Some("dad@example.com"), "parent")
            .await
            .expect("secondary");
        let child = test_helpers::insert_account(&pool, None, "child")
            .await
            .expect("child");
        let service = ConsentService::new(pool, Arc::new(SystemClock));
        service
            .link_parent(primary, child, ParentLinkRole::Primary, LinkPermissions::full())
            .await
            .expect("primary link");
        service
            .link_parent(
                secondary,
                child,
                ParentLinkRole::Secondary,
                LinkPermissions::view_only(),
            )
            .await
            .expect("secondary link");
        (service, primary, secondary, child)
    }

    #[tokio::test]
    async fn primary_parent_can_change_another_parents_permissions() {
        let (service, primary, secondary, child) = two_parent_family().await;
        let session = Session::issue(primary, Utc::now(), Duration::hours(1));

        let updated = service
            .update_permissions(&session, secondary, child, LinkPermissions::full())
            .await
            .expect("primary may update");
        assert!(updated.can_manage_child);
        assert_eq!(updated.role, ParentLinkRole::Secondary);

        let listed = service.links_for_parent(secondary).await.expect("links");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].can_change_settings);
    }

    #[tokio::test]
    async fn secondary_parent_cannot_change_the_primary_link() {
        let (service, primary, secondary, child) = two_parent_family().await;
        let session = Session::issue(secondary, Utc::now(), Duration::hours(1));

        let result = service
            .update_permissions(&session, primary, child, LinkPermissions::view_only())
            .await;
        assert!(matches!(result, Err(ConsentError::NotAuthorized)));

        let untouched = service.link(primary, child).await.expect("query").expect("link");
        assert!(untouched.can_manage_child);
    }

    #[tokio::test]
    async fn linked_parent_can_change_their_own_permissions() {
        let (service, _primary, secondary, child) = two_parent_family().await;
        let session = Session::issue(secondary, Utc::now(), Duration::hours(1));

        let quiet = LinkPermissions {
            receives_notifications: false,
            ..LinkPermissions::view_only()
        };
        let updated = service
            .update_permissions(&session, secondary, child, quiet)
            .await
            .expect("own link");
        assert!(!updated.receives_notifications);
    }

    #[tokio::test]
    async fn unlinked_or_expired_session_cannot_change_permissions() {
        let (service, primary, _secondary, child) = two_parent_family().await;

        let stranger = Session::issue(primary + 100, Utc::now(), Duration::hours(1));
        let result = service
            .update_permissions(&stranger, primary, child, LinkPermissions::view_only())
            .await;
        assert!(matches!(result, Err(ConsentError::NotAuthorized)));

        let stale = Session::issue(primary, Utc::now() - Duration::hours(2), Duration::hours(1));
        let result = service
            .update_permissions(&stale, primary, child, LinkPermissions::view_only())
            .await;
        assert!(matches!(result, Err(ConsentError::NotAuthorized)));

        let missing = Session::issue(primary, Utc::now(), Duration::hours(1));
        let result = service
            .update_permissions(&missing, primary, child + 100, LinkPermissions::view_only())
            .await;
        assert!(matches!(result, Err(ConsentError::LinkNotFound)));
    }
}
