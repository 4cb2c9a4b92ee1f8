use std::env;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha512};
use time::Duration;
use tower_sessions::{
    cookie::{Key, SameSite},
    service::SignedCookie,
    Expiry, SessionManagerLayer,
};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::warn;

use crate::models::Session;

/// Signed cookie session layer carrying the logged-in account.
pub type SessionLayer = SessionManagerLayer<SqliteStore, SignedCookie>;

const SESSION_KEY: &str = "cliqsafe.session";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub expiry: Duration,
    pub name: String,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        if current_environment() == "production" {
            SessionConfig {
                secure: true,
                http_only: true,
                same_site: SameSite::Strict,
                expiry: Duration::hours(2),
                name: "__Host-cliqsafe".to_string(),
            }
        } else {
            SessionConfig {
                secure: false,
                http_only: true,
                same_site: SameSite::Lax,
                expiry: Duration::days(7),
                name: "cliqsafe".to_string(),
            }
        }
    }

    pub fn create_layer(&self, store: SqliteStore) -> SessionLayer {
        SessionManagerLayer::new(store)
            .with_secure(self.secure)
            .with_http_only(self.http_only)
            .with_same_site(self.same_site)
            .with_name(self.name.clone())
            .with_expiry(Expiry::OnInactivity(self.expiry))
            .with_signed(load_session_key())
    }
}

/// Reads the explicit [`Session`] value stored in the cookie session, if any.
pub async fn read_session(cookie_session: &tower_sessions::Session) -> Option<Session> {
    match cookie_session.get::<Session>(SESSION_KEY).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Failed to read session: {}", e);
            None
        }
    }
}

pub async fn store_session(
    cookie_session: &tower_sessions::Session,
    session: Session,
) -> Result<(), tower_sessions::session::Error> {
    cookie_session.cycle_id().await?;
    cookie_session.insert(SESSION_KEY, session).await
}

pub async fn clear_session(
    cookie_session: &tower_sessions::Session,
) -> Result<(), tower_sessions::session::Error> {
    cookie_session.flush().await
}

pub fn validate_production_config() {
    if current_environment() != "production" {
        return;
    }

    if !env_flag_enabled("FORCE_HTTPS") {
        panic!("FATAL: Production environment requires HTTPS. Set FORCE_HTTPS=true");
    }

    let secret = env::var("SESSION_SECRET").expect("SESSION_SECRET must be set in production");
    if decode_secret_bytes(&secret).len() < 64 {
        panic!("FATAL: SESSION_SECRET must be at least 64 bytes in production");
    }

    let lowered = secret.to_ascii_lowercase();
    if lowered.contains("example") || lowered.contains("changeme") || lowered.contains("default") {
        panic!("FATAL: SESSION_SECRET appears to be a default value. Generate a secure secret!");
    }
}

fn current_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

fn env_flag_enabled(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

fn load_session_key() -> Key {
    match env::var("SESSION_SECRET") {
        Ok(secret) if !secret.is_empty() => key_from_secret_bytes(&decode_secret_bytes(&secret)),
        _ => {
            warn!("SESSION_SECRET not set; generating ephemeral key (development only)");
            Key::generate()
        }
    }
}

fn decode_secret_bytes(secret: &str) -> Vec<u8> {
    STANDARD
        .decode(secret.as_bytes())
        .unwrap_or_else(|_| secret.as_bytes().to_vec())
}

fn key_from_secret_bytes(bytes: &[u8]) -> Key {
    if bytes.len() >= 64 {
        Key::from(&bytes[..64])
    } else {
        Key::from(Sha512::digest(bytes).as_slice())
    }
}
