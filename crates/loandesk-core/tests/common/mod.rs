//! In-process mock of the loan platform backend.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Duration as ChronoDuration;
use loandesk_core::auth::{TokenKeys, TokenStore, TokenTtls};
use loandesk_core::config::Portal;
use loandesk_core::ApiClient;
use serde_json::{json, Value};

pub const EMAIL: &str = "borrower@example.com";
pub const PASSWORD: &str = "correct horse";

#[derive(Default)]
pub struct MockBackend {
    /// Access tokens the backend currently accepts
    pub valid_access: Mutex<HashSet<String>>,
    /// The one refresh token the backend currently accepts (rotated on use)
    pub valid_refresh: Mutex<Option<String>>,
    /// Forced status for the refresh endpoint, if set
    pub refresh_status: Mutex<Option<StatusCode>>,
    /// Return a malformed body from the refresh endpoint
    pub refresh_malformed: Mutex<bool>,
    /// Forced status for the who-am-i endpoint, if set
    pub me_status: Mutex<Option<StatusCode>>,
    pub role: Mutex<String>,
    pub refresh_delay_ms: AtomicUsize,

    pub loan_hits: AtomicUsize,
    pub refresh_hits: AtomicUsize,
    pub me_hits: AtomicUsize,
    pub logout_hits: AtomicUsize,
    pub forbidden_hits: AtomicUsize,
    issued: AtomicUsize,
}

impl MockBackend {
    pub fn accept_access(&self, token: &str) {
        self.valid_access.lock().unwrap().insert(token.to_string());
    }

    pub fn revoke_access(&self, token: &str) {
        self.valid_access.lock().unwrap().remove(token);
    }

    pub fn accept_refresh(&self, token: &str) {
        *self.valid_refresh.lock().unwrap() = Some(token.to_string());
    }

    pub fn set_refresh_status(&self, status: StatusCode) {
        *self.refresh_status.lock().unwrap() = Some(status);
    }

    pub fn set_me_status(&self, status: StatusCode) {
        *self.me_status.lock().unwrap() = Some(status);
    }

    pub fn set_role(&self, role: &str) {
        *self.role.lock().unwrap() = role.to_string();
    }

    pub fn hits(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| self.valid_access.lock().unwrap().contains(token))
            .unwrap_or(false)
    }

    fn issue_pair(&self) -> (String, String) {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{}", n);
        let refresh = format!("refresh-{}", n);
        self.accept_access(&access);
        self.accept_refresh(&refresh);
        (access, refresh)
    }
}

type Shared = Arc<MockBackend>;

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthorized"}))).into_response()
}

async fn loans(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    backend.loan_hits.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"loans": [{"id": 1, "amount": 25000, "status": "DISBURSED"}]})).into_response()
}

async fn delete_loan(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn applications(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if body.get("amount").and_then(|a| a.as_u64()).unwrap_or(0) == 0 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"errors": {"amount": "must be positive"}})),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(json!({"id": "app-1", "received": body}))).into_response()
}

async fn echo_headers(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "authorization": value("authorization"),
        "contentType": value("content-type"),
        "requestId": value("x-request-id"),
    }))
    .into_response()
}

async fn always_forbidden(State(backend): State<Shared>) -> Response {
    backend.forbidden_hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

async fn server_error(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response()
}

async fn not_json(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, "<html>maintenance</html>").into_response()
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_secs(3)).await;
    Json(json!({"late": true})).into_response()
}

async fn me(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    backend.me_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = *backend.me_status.lock().unwrap() {
        return (status, "who-am-i unavailable").into_response();
    }
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let role = backend.role.lock().unwrap().clone();
    Json(json!({
        "id": 7,
        "role": if role.is_empty() { "USER".to_string() } else { role },
        "displayName": "Nur Aisyah",
        "email": EMAIL,
    }))
    .into_response()
}

async fn refresh(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    backend.refresh_hits.fetch_add(1, Ordering::SeqCst);

    let delay = backend.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }

    if let Some(status) = *backend.refresh_status.lock().unwrap() {
        return (status, "refresh unavailable").into_response();
    }
    if *backend.refresh_malformed.lock().unwrap() {
        return Json(json!({"token": "wrong-shape"})).into_response();
    }

    let presented = body.get("refreshToken").and_then(|t| t.as_str()).map(str::to_string);
    let expected = backend.valid_refresh.lock().unwrap().clone();
    match (presented, expected) {
        (Some(presented), Some(expected)) if presented == expected => {
            let (access, refresh) = backend.issue_pair();
            Json(json!({"accessToken": access, "refreshToken": refresh})).into_response()
        }
        _ => unauthorized(),
    }
}

async fn login(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    let email = body.get("email").and_then(|v| v.as_str());
    let password = body.get("password").and_then(|v| v.as_str());
    if email != Some(EMAIL) || password != Some(PASSWORD) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid credentials"}))).into_response();
    }
    let (access, refresh) = backend.issue_pair();
    Json(json!({
        "accessToken": access,
        "refreshToken": refresh,
        "user": {"id": 7, "role": "USER", "displayName": "Nur Aisyah"},
    }))
    .into_response()
}

async fn logout(State(backend): State<Shared>) -> Response {
    backend.logout_hits.fetch_add(1, Ordering::SeqCst);
    *backend.valid_refresh.lock().unwrap() = None;
    StatusCode::NO_CONTENT.into_response()
}

/// Start the mock backend on an ephemeral port.
pub async fn spawn_backend() -> (Shared, SocketAddr) {
    let backend: Shared = Arc::new(MockBackend::default());

    let app = Router::new()
        .route("/loans", get(loans))
        .route("/loans/1", delete(delete_loan))
        .route("/applications", post(applications))
        .route("/echo-headers", get(echo_headers))
        .route("/forbidden", get(always_forbidden))
        .route("/server-error", get(server_error))
        .route("/not-json", get(not_json))
        .route("/slow", get(slow))
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock backend");
    let addr = listener.local_addr().expect("Mock backend has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Mock backend failed");
    });

    (backend, addr)
}

pub fn test_ttls() -> TokenTtls {
    TokenTtls {
        access: ChronoDuration::minutes(15),
        refresh: ChronoDuration::days(90),
    }
}

pub fn borrower_store() -> Arc<TokenStore> {
    Arc::new(TokenStore::in_memory(Portal::Borrower.token_keys(), test_ttls()))
}

pub fn client_with_timeout(addr: SocketAddr, store: Arc<TokenStore>, timeout: Duration) -> ApiClient {
    ApiClient::new(
        &format!("http://{}", addr),
        Portal::Borrower.default_endpoints(),
        store,
        timeout,
    )
    .expect("Failed to build API client")
}

pub fn client_for(addr: SocketAddr, store: Arc<TokenStore>) -> ApiClient {
    client_with_timeout(addr, store, Duration::from_secs(5))
}

/// Store holding a pair the backend accepts.
pub fn signed_in(backend: &MockBackend, store: &TokenStore, access: &str, refresh: &str) {
    backend.accept_access(access);
    backend.accept_refresh(refresh);
    store.store_pair(access, refresh).expect("Failed to seed tokens");
}

/// Keys used by the borrower portal.
pub fn borrower_keys() -> TokenKeys {
    Portal::Borrower.token_keys()
}
