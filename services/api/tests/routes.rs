//! Router-level tests: real handlers, middleware and engine, with the browser
//! replaced by a scripted executor and authenticator.

use api_lib::web::{self, state::AppState};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;
use xengage_core::{
    ActionAuth, ActionExecutor, ActionOutput, ActionReport, ActionSpec, Authenticator,
    AutomationError, AutomationTimeouts, Clock, Credentials, Engine, FetchedItem, InMemoryAccountStore,
    LoginSuccess, ManualClock, PlatformUrls, PostedItem, ProfileData, Session, SessionCookie,
    SessionData, SessionStore,
};

//=========================================================================================
// Scripted Collaborators
//=========================================================================================

#[derive(Default)]
struct StubExecutor {
    seen: Mutex<Vec<(String, ActionSpec)>>,
}

impl StubExecutor {
    fn seen(&self) -> Vec<(String, ActionSpec)> {
        self.seen.lock().unwrap().clone()
    }
}

fn posted(id: &str) -> PostedItem {
    PostedItem {
        id: id.to_string(),
        url: format!("https://x.test/alice/status/{}", id),
        skipped_media: vec![],
    }
}

fn item(id: &str) -> FetchedItem {
    FetchedItem {
        id: id.to_string(),
        text: format!("item {}", id),
        author: "alice".to_string(),
        created_at: None,
        likes_count: 3,
        reposts_count: 1,
        replies_count: 0,
    }
}

#[async_trait]
impl ActionExecutor for StubExecutor {
    async fn execute(&self, auth: ActionAuth, spec: ActionSpec) -> ActionReport {
        self.seen.lock().unwrap().push((auth.username.clone(), spec.clone()));
        let locked = auth
            .credentials
            .as_ref()
            .is_some_and(|c| c.username == "locked");
        if locked {
            return ActionReport::failed(AutomationError::TwoFactorRequired);
        }
        let output = match spec {
            ActionSpec::Post { .. } | ActionSpec::Reply { .. } => ActionOutput::Posted(posted("100")),
            ActionSpec::Thread { segments, .. } => ActionOutput::ThreadPosted(
                (0..segments.len()).map(|i| posted(&format!("20{}", i))).collect(),
            ),
            ActionSpec::FetchTimeline { .. } => ActionOutput::Items(vec![item("1"), item("2")]),
            ActionSpec::FetchSingle { id } if id == "missing" => ActionOutput::Items(vec![]),
            ActionSpec::FetchSingle { id } => ActionOutput::Items(vec![item(&id)]),
            ActionSpec::Login => ActionOutput::LoggedIn(ProfileData::default()),
        };
        ActionReport::succeeded(output)
    }
}

struct StubAuthenticator;

#[async_trait]
impl Authenticator for StubAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginSuccess, AutomationError> {
        if credentials.password != "pw" {
            return Err(AutomationError::InvalidCredentials {
                detail: Some("Wrong password!".to_string()),
            });
        }
        Ok(LoginSuccess {
            session: Session {
                username: credentials.username.clone(),
                data: SessionData {
                    cookies: vec![SessionCookie {
                        name: "auth_token".to_string(),
                        value: "token".to_string(),
                        domain: ".x.test".to_string(),
                        path: "/".to_string(),
                        expires: None,
                        http_only: true,
                        secure: true,
                        same_site: None,
                    }],
                    local_storage: BTreeMap::new(),
                },
                captured_at: Utc::now(),
            },
            profile: ProfileData {
                username: credentials.username.clone(),
                display_name: format!("{} display", credentials.username),
                profile_image_url: String::new(),
            },
        })
    }
}

struct TestApp {
    router: Router,
    executor: Arc<StubExecutor>,
    clock: Arc<ManualClock>,
}

fn app() -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let sessions = Arc::new(SessionStore::new(
        PlatformUrls::new("https://x.test".to_string()),
        AutomationTimeouts::default(),
        clock.clone(),
    ));
    let executor = Arc::new(StubExecutor::default());
    let engine = Arc::new(Engine::new(
        executor.clone(),
        Arc::new(StubAuthenticator),
        sessions,
        Arc::new(InMemoryAccountStore::new()),
        clock.clone(),
    ));
    TestApp {
        router: web::router(Arc::new(AppState::new(engine))),
        executor,
        clock,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

//=========================================================================================
// Posting
//=========================================================================================

#[tokio::test]
async fn post_with_credentials_publishes_immediately() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/twitter/post",
        None,
        Some(json!({"content": "hello", "credentials": {"username": "alice", "password": "pw"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["tweet_id"], "100");
    assert_eq!(body["scheduled"], false);
}

#[tokio::test]
async fn post_without_credentials_or_default_is_bad_request() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    let (status, body) = send(
        &app,
        Method::POST,
        "/twitter/post",
        Some(&user),
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("missing-credentials"));
    assert!(app.executor.seen().is_empty());
}

#[tokio::test]
async fn malformed_user_header_is_rejected() {
    let app = app();
    let (status, _) = send(&app, Method::GET, "/user/twitter-accounts", Some("nope"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn two_factor_failure_maps_to_unauthorized() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/twitter/reply/42",
        None,
        Some(json!({"content": "hi", "credentials": {"username": "locked", "password": "pw"}})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.as_str().unwrap().contains("two-factor-required"));
}

#[tokio::test]
async fn thread_response_carries_every_id() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/twitter/post-thread",
        None,
        Some(json!({
            "tweets": ["one", "two", "three"],
            "credentials": {"username": "alice", "password": "pw"},
            "media_paths": {"1": ["/tmp/a.png"]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tweet_ids"], json!(["200", "201", "202"]));
    assert_eq!(body["thread_id"], "200");

    let (_, spec) = app.executor.seen().pop().unwrap();
    let ActionSpec::Thread { media, .. } = spec else {
        panic!("expected a thread action");
    };
    assert_eq!(media.get(&1), Some(&vec!["/tmp/a.png".to_string()]));
}

//=========================================================================================
// Scheduling
//=========================================================================================

#[tokio::test]
async fn scheduled_reply_can_be_listed_and_cancelled_once() {
    let app = app();
    let at = app.clock.now() + Duration::hours(1);
    let (status, body) = send(
        &app,
        Method::POST,
        "/twitter/reply/42",
        None,
        Some(json!({
            "content": "later",
            "credentials": {"username": "alice", "password": "pw"},
            "schedule_time": at.to_rfc3339()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scheduled"], true);
    let id = body["tweet_id"].as_str().unwrap().to_string();
    assert!(id.starts_with("scheduled-reply-"));
    assert!(app.executor.seen().is_empty());

    let (_, listing) = send(&app, Method::GET, "/twitter/scheduled", None, None).await;
    assert_eq!(listing["posts"][0]["id"], id.as_str());
    assert_eq!(listing["posts"][0]["status"], "pending");
    assert!(listing["posts"][0].get("credentials").is_none());

    let uri = format!("/twitter/scheduled/{}", id);
    let (status, _) = send(&app, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//=========================================================================================
// Reads
//=========================================================================================

#[tokio::test]
async fn timeline_defaults_to_twenty_items_and_strips_the_at_sign() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/twitter/fetch-timeline?username=@alice", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["retweets_count"], 1);
    assert_eq!(
        app.executor.seen()[0].1,
        ActionSpec::FetchTimeline {
            username: "alice".to_string(),
            count: 20
        }
    );
}

#[tokio::test]
async fn unknown_tweet_is_not_found() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/twitter/fetch-tweet/7", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "7");

    let (status, _) = send(&app, Method::GET, "/twitter/fetch-tweet/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//=========================================================================================
// Accounts
//=========================================================================================

#[tokio::test]
async fn auth_request_flow_links_the_account() {
    let app = app();
    let user = Uuid::new_v4().to_string();

    let (status, created) = send(&app, Method::POST, "/user/auth/twitter/request", Some(&user), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    let request_id = created["request_id"].as_str().unwrap().to_string();

    let (status, done) = send(
        &app,
        Method::POST,
        &format!("/user/auth/twitter/authenticate/{}", request_id),
        None,
        Some(json!({"username": "alice", "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["success"], true);
    assert_eq!(done["display_name"], "alice display");

    let (_, accounts) = send(&app, Method::GET, "/user/twitter-accounts", Some(&user), None).await;
    assert_eq!(accounts[0]["username"], "alice");
    assert_eq!(accounts[0]["is_default"], true);
    assert_eq!(accounts[0]["has_session"], true);

    let (_, polled) = send(
        &app,
        Method::GET,
        &format!("/user/auth/twitter/status/{}", request_id),
        None,
        None,
    )
    .await;
    assert_eq!(polled["status"], "completed");
}

#[tokio::test]
async fn failed_auth_request_reports_its_code() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    let (_, created) = send(&app, Method::POST, "/user/auth/twitter/request", Some(&user), None).await;
    let request_id = created["request_id"].as_str().unwrap();

    let (status, failed) = send(
        &app,
        Method::POST,
        &format!("/user/auth/twitter/authenticate/{}", request_id),
        None,
        Some(json!({"username": "alice", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["error_code"], "invalid-credentials");

    let (status, _) = send(&app, Method::GET, "/user/auth/twitter/status/unknown", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn default_account_is_used_and_promoted_on_removal() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    for name in ["alice", "bob"] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/user/auth/twitter",
            Some(&user),
            Some(json!({"username": name, "password": "pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = send(
        &app,
        Method::POST,
        "/twitter/post",
        Some(&user),
        Some(json!({"content": "as default"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.executor.seen().last().unwrap().0, "alice");

    let (status, _) = send(&app, Method::DELETE, "/user/twitter-accounts/alice", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, bob) = send(&app, Method::GET, "/user/twitter-accounts/bob", Some(&user), None).await;
    assert_eq!(bob["is_default"], true);

    let (status, _) = send(
        &app,
        Method::POST,
        "/user/twitter-accounts/default/alice",
        Some(&user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn account_routes_require_a_user() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/user/twitter-accounts", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.as_str().unwrap().contains("x-user-id"));
}
