use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::{env, str::FromStr, time::Duration};

pub async fn create_pool() -> Result<SqlitePool, sqlx::Error> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| sqlx::Error::Configuration("DATABASE_URL must be set".into()))?;

    // Ensure the data directory exists
    if let Some(parent) = std::path::Path::new(&database_url.replace("sqlite://", "")).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    connect(&database_url, 5).await
}

/// Opens a pool on `database_url`. Writers wait on each other through the
/// busy timeout instead of failing with `SQLITE_BUSY`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}
