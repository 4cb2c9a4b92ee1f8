use crate::config::workflow::WorkflowConfig;
use crate::services::email_service::EmailSender;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Composes workflow emails and delivers them best effort.
///
/// Every method reports whether delivery succeeded but never fails: a state
/// transition is durable once its write commits, whatever happens to the mail.
#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn EmailSender>,
    config: WorkflowConfig,
}

impl Notifier {
    pub fn new(sender: Arc<dyn EmailSender>, config: WorkflowConfig) -> Self {
        Self { sender, config }
    }

    pub async fn approval_request(
        &self,
        parent_email: &str,
        child_name: &str,
        raw_secret: &str,
        expires_at: DateTime<Utc>,
    ) -> bool {
        let url = self.config.approval_url(raw_secret);
        let html = layout(
            &format!("{} wants to join Cliqsafe", child_name),
            &format!(
                "<p>{} asked to join Cliqsafe and listed you as their parent or guardian.</p>\
                 <p>Review the request and accept the Red Alert safety agreement to approve it.</p>",
                child_name
            ),
            "Review request",
            &url,
            &format!("This link expires on {}.", expires_at.format("%B %-d, %Y")),
        );

        self.deliver(
            parent_email,
            &format!("Approve {}'s Cliqsafe account", child_name),
            &html,
        )
        .await
    }

    pub async fn magic_link(&self, email: &str, raw_secret: &str) -> bool {
        let url = self.config.magic_link_url(raw_secret);
        let html = layout(
            "Your Cliqsafe login link",
            "<p>Click the button below to log in to your account.</p>",
            "Log in",
            &url,
            &format!(
                "This link expires in {} minutes. If you didn't request it, you can ignore this email.",
                self.config.magic_link_ttl.num_minutes()
            ),
        );

        self.deliver(email, "Your Cliqsafe login link", &html).await
    }

    pub async fn invite(&self, email: &str, inviter_name: &str, raw_secret: &str) -> bool {
        let url = self.config.invite_url(raw_secret);
        let html = layout(
            &format!("{} invited you to a cliq", inviter_name),
            "<p>Use the button below to accept the invitation.</p>",
            "Join the cliq",
            &url,
            &format!(
                "This invitation expires in {} days.",
                self.config.invite_ttl.num_days()
            ),
        );

        self.deliver(email, "You're invited to a Cliqsafe cliq", &html)
            .await
    }

    pub async fn approval_confirmed(&self, parent_email: &str, child_name: &str) -> bool {
        let html = layout(
            &format!("{} is all set", child_name),
            &format!(
                "<p>You approved {}'s account. You can manage their settings from your parent dashboard.</p>",
                child_name
            ),
            "Open dashboard",
            &format!("{}/parent", self.config.base_url),
            "",
        );

        self.deliver(
            parent_email,
            &format!("{}'s account is approved", child_name),
            &html,
        )
        .await
    }

    async fn deliver(&self, to: &str, subject: &str, html: &str) -> bool {
        match self.sender.send(to, subject, html).await {
            Ok(()) => {
                tracing::info!("Email '{}' sent to {}", subject, to);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to send '{}' to {}: {}", subject, to, e);
                false
            }
        }
    }
}

fn layout(heading: &str, body: &str, action: &str, url: &str, footer: &str) -> String {
    format!(
        r#"
<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #333;">{heading}</h1>
    {body}
    <p style="text-align: center; margin: 30px 0;">
        <a href="{url}" style="background-color: #2196F3; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">{action}</a>
    </p>
    <p style="color: #666; font-size: 14px; word-break: break-all;">{url}</p>
    <p style="color: #999; font-size: 12px; margin-top: 40px;">{footer}</p>
</body>
</html>
"#
    )
}
