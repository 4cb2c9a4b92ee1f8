use cliqsafe::{
    build_router,
    clock::shared_system_clock,
    config::{
        session::{validate_production_config, SessionConfig},
        WorkflowConfig,
    },
    db,
    services::create_email_sender,
    AppState,
};

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use std::{net::SocketAddr, time::Duration};
use tower_http::trace::TraceLayer;
use tower_sessions_sqlx_store::SqliteStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cliqsafe=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection
    let pool = db::create_pool().await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let config = WorkflowConfig::from_env();
    let app_state = AppState::new(
        pool.clone(),
        shared_system_clock(),
        create_email_sender(),
        config,
    );

    // Expired tokens are unusable already; this only reclaims the rows.
    let token_store = app_state.token_store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(e) = token_store.sweep_expired().await {
                tracing::warn!("Token sweep failed: {}", e);
            }
        }
    });

    // Session store
    validate_production_config();
    let session_store = SqliteStore::new(pool.clone()).with_table_name("sessions")?;
    session_store.migrate().await?;

    let session_layer = SessionConfig::from_env().create_layer(session_store);

    let app = build_router(app_state)
        .layer(session_layer)
        .layer(middleware::from_fn(add_security_headers))
        .layer(TraceLayer::new_for_http());

    // Start server
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()?;

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));

    tracing::info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn add_security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    if std::env::var("ENVIRONMENT")
        .map(|env| env == "production")
        .unwrap_or(false)
    {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }

    response
}
