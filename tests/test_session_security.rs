use std::env;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Response, StatusCode},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Duration;
use cliqsafe::{
    auth::middleware::require_auth,
    clock::{Clock, ManualClock},
    config::{
        session::{clear_session, read_session, store_session, SessionConfig},
        WorkflowConfig,
    },
    models::Session as Login,
    test_utils::test_helpers::{self, RecordingEmailSender},
    AppState,
};
use serial_test::serial;
use std::sync::Arc;
use tower::ServiceExt;
use tower_sessions::{cookie::SameSite, Session};
use tower_sessions_sqlx_store::SqliteStore;

/// Overrides process environment variables until dropped.
struct ScopedEnv {
    saved: Vec<(&'static str, Option<String>)>,
}

impl ScopedEnv {
    fn apply(vars: &[(&'static str, Option<&str>)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, value)| {
                let previous = env::var(key).ok();
                match value {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
                (*key, previous)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }
}

const ACCOUNT_ID: i64 = 41;

async fn login(State(state): State<AppState>, cookie_session: Session) -> StatusCode {
    let login = Login::issue(ACCOUNT_ID, state.clock.now(), Duration::hours(1));
    match store_session(&cookie_session, login).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn whoami(cookie_session: Session) -> Json<Option<Login>> {
    Json(read_session(&cookie_session).await)
}

async fn logout(cookie_session: Session) -> StatusCode {
    match clear_session(&cookie_session).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn me(Extension(login): Extension<Login>) -> Json<i64> {
    Json(login.user_id)
}

/// A router exercising the session helpers, with `/me` behind the real auth
/// middleware.
async fn session_app(clock: ManualClock) -> Router {
    let pool = test_helpers::create_test_db().await.unwrap();
    let state = AppState::new(
        pool.clone(),
        Arc::new(clock),
        Arc::new(RecordingEmailSender::new()),
        WorkflowConfig::default(),
    );

    let store = SqliteStore::new(pool)
        .with_table_name("sessions_test")
        .unwrap();
    store.migrate().await.unwrap();

    let protected = Router::new()
        .route("/me", get(me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/login", post(login))
        .route("/whoami", get(whoami))
        .route("/logout", post(logout))
        .merge(protected)
        .with_state(state)
        .layer(SessionConfig::from_env().create_layer(store))
}

fn request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn cookie_pair(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("a session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
#[serial]
async fn stored_login_is_read_back_from_the_cookie() {
    let _env = ScopedEnv::apply(&[("ENVIRONMENT", None)]);
    let clock = ManualClock::starting_now();
    let app = session_app(clock.clone()).await;

    let anonymous = app
        .clone()
        .oneshot(request("GET", "/whoami", None))
        .await
        .unwrap();
    assert_eq!(body_json::<Option<Login>>(anonymous).await, None);

    let logged_in = app
        .clone()
        .oneshot(request("POST", "/login", None))
        .await
        .unwrap();
    assert_eq!(logged_in.status(), StatusCode::NO_CONTENT);
    let cookie = cookie_pair(&logged_in);

    let read_back = app
        .clone()
        .oneshot(request("GET", "/whoami", Some(&cookie)))
        .await
        .unwrap();
    let login = body_json::<Option<Login>>(read_back)
        .await
        .expect("session to survive the round trip");
    assert_eq!(login.user_id, ACCOUNT_ID);
    assert_eq!(login.issued_at, clock.now_ts());
    assert_eq!(login.expires_at, clock.now_ts() + 3600);
}

#[tokio::test]
#[serial]
async fn logout_forgets_the_login() {
    let _env = ScopedEnv::apply(&[("ENVIRONMENT", None)]);
    let app = session_app(ManualClock::starting_now()).await;

    let logged_in = app
        .clone()
        .oneshot(request("POST", "/login", None))
        .await
        .unwrap();
    let cookie = cookie_pair(&logged_in);

    let logged_out = app
        .clone()
        .oneshot(request("POST", "/logout", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(logged_out.status(), StatusCode::NO_CONTENT);

    let after = app
        .oneshot(request("GET", "/whoami", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(body_json::<Option<Login>>(after).await, None);
}

#[tokio::test]
#[serial]
async fn expired_login_is_refused_by_auth_middleware() {
    let _env = ScopedEnv::apply(&[("ENVIRONMENT", None)]);
    let clock = ManualClock::starting_now();
    let app = session_app(clock.clone()).await;

    let logged_in = app
        .clone()
        .oneshot(request("POST", "/login", None))
        .await
        .unwrap();
    let cookie = cookie_pair(&logged_in);

    clock.advance(Duration::minutes(59));
    let fresh = app
        .clone()
        .oneshot(request("GET", "/me", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(fresh.status(), StatusCode::OK);
    assert_eq!(body_json::<i64>(fresh).await, ACCOUNT_ID);

    clock.advance(Duration::minutes(2));
    let stale = app
        .oneshot(request("GET", "/me", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn production_cookie_is_host_prefixed_and_strict() {
    let secret = "k".repeat(64);
    let _env = ScopedEnv::apply(&[
        ("ENVIRONMENT", Some("production")),
        ("SESSION_SECRET", Some(secret.as_str())),
    ]);

    let config = SessionConfig::from_env();
    assert_eq!(config.name, "__Host-cliqsafe");
    assert!(config.secure);
    assert!(config.http_only);
    assert_eq!(config.same_site, SameSite::Strict);
    assert_eq!(config.expiry, time::Duration::hours(2));

    let app = session_app(ManualClock::starting_now()).await;
    let response = app
        .oneshot(request("POST", "/login", None))
        .await
        .unwrap();
    let issued = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("a session cookie")
        .to_str()
        .unwrap()
        .to_string();
    let cookie = tower_sessions::cookie::Cookie::parse(issued).unwrap();

    assert_eq!(cookie.name(), "__Host-cliqsafe");
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    assert_eq!(cookie.path().unwrap_or("/"), "/");
}

#[test]
#[serial]
fn development_cookie_is_relaxed() {
    let _env = ScopedEnv::apply(&[("ENVIRONMENT", None)]);

    let config = SessionConfig::from_env();
    assert_eq!(config.name, "cliqsafe");
    assert!(!config.secure);
    assert!(config.http_only);
    assert_eq!(config.same_site, SameSite::Lax);
    assert_eq!(config.expiry, time::Duration::days(7));
}
