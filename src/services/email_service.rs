use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use std::env;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to build email message: {0}")]
    MessageBuild(String),
    #[error("Failed to send email: {0}")]
    SendFailed(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Outbound mail capability. The workflow hands it finished HTML and never
/// depends on delivery succeeding.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError>;
}

/// Logs messages instead of delivering them.
#[derive(Default)]
pub struct MockEmailSender;

impl MockEmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        tracing::info!("📧 [MOCK EMAIL] To: {}", to);
        tracing::info!("   Subject: {}", subject);
        tracing::debug!("   Body: {}", html);
        tracing::info!("   ---");
        Ok(())
    }
}

pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpEmailSender {
    pub fn new() -> Result<Self, EmailError> {
        let smtp_host = env::var("SMTP_HOST")
            .map_err(|_| EmailError::ConfigError("SMTP_HOST not set".to_string()))?;
        let smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse::<u16>()
            .map_err(|_| EmailError::ConfigError("Invalid SMTP_PORT".to_string()))?;
        let smtp_username = env::var("SMTP_USERNAME")
            .map_err(|_| EmailError::ConfigError("SMTP_USERNAME not set".to_string()))?;
        let smtp_password = env::var("SMTP_PASSWORD")
            .map_err(|_| EmailError::ConfigError("SMTP_PASSWORD not set".to_string()))?;
        let from_email = env::var("SMTP_FROM_EMAIL")
            .map_err(|_| EmailError::ConfigError("SMTP_FROM_EMAIL not set".to_string()))?;
        let from_name = env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Cliqsafe".to_string());
        let encryption = env::var("SMTP_ENCRYPTION").unwrap_or_else(|_| "starttls".to_string());

        let credentials = Credentials::new(smtp_username, smtp_password);

        let mailer = match encryption.to_lowercase().as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_host)
                .map_err(|e| EmailError::ConfigError(format!("SMTP relay error: {}", e)))?
                .port(smtp_port)
                .credentials(credentials)
                .build(),
            "starttls" => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_host)
                .map_err(|e| EmailError::ConfigError(format!("SMTP starttls error: {}", e)))?
                .port(smtp_port)
                .credentials(credentials)
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_host)
                .port(smtp_port)
                .credentials(credentials)
                .build(),
            _ => {
                return Err(EmailError::ConfigError(format!(
                    "Invalid SMTP_ENCRYPTION value: {}. Use 'tls', 'starttls', or 'none'",
                    encryption
                )))
            }
        };

        Ok(Self {
            mailer,
            from_email,
            from_name,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.from_name, self.from_email)
                    .parse()
                    .map_err(|e| {
                        EmailError::MessageBuild(format!("Invalid from address: {}", e))
                    })?,
            )
            .to(to
                .parse()
                .map_err(|e| EmailError::MessageBuild(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| EmailError::MessageBuild(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

pub fn create_email_sender() -> Arc<dyn EmailSender> {
    if env::var("SMTP_HOST").is_ok() {
        match SmtpEmailSender::new() {
            Ok(sender) => {
                tracing::info!("Using SMTP email sender");
                Arc::new(sender)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize SMTP email sender: {}. Falling back to mock sender",
                    e
                );
                Arc::new(MockEmailSender::new())
            }
        }
    } else {
        tracing::info!("SMTP not configured. Using mock email sender (emails are logged)");
        Arc::new(MockEmailSender::new())
    }
}
