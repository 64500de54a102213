//! In-memory stand-in for the Checkvist service.
//!
//! Serves the auth endpoints and a minimal checklist resource, enforces the
//! `X-Client-Token` header on data routes, and lets tests queue forced error
//! statuses per path to exercise client retry behaviour over real HTTP.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const TOKEN_HEADER: &str = "x-client-token";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub const DEMO_USERNAME: &str = "user@example.com";
pub const DEMO_REMOTE_KEY: &str = "api-key";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checklist {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub task_count: u32,
}

#[derive(Clone, Debug)]
pub struct Account {
    pub remote_key: String,
    /// Required second factor, if the account has one enabled.
    pub totp: Option<String>,
    pub user: User,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub remote_key: String,
    pub totp: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshForm {
    pub old_token: String,
}

#[derive(Deserialize)]
pub struct CreateChecklist {
    pub checklist: NewChecklist,
}

#[derive(Deserialize)]
pub struct NewChecklist {
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Serialize)]
struct TokenBody {
    token: String,
}

pub type Db = Arc<RwLock<HashMap<u64, Checklist>>>;

/// Shared server state. Clones observe the same accounts, tokens and counters.
#[derive(Clone, Default)]
pub struct MockState {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
    /// Issued token -> username.
    tokens: Arc<RwLock<HashMap<String, String>>>,
    checklists: Db,
    next_id: Arc<AtomicU64>,
    faults: Arc<Mutex<HashMap<String, VecDeque<u16>>>>,
    hits: Arc<Mutex<HashMap<String, u32>>>,
    logins: Arc<AtomicU32>,
    refreshes: Arc<AtomicU32>,
}

impl MockState {
    /// State with the demo account registered.
    pub fn new() -> Self {
        let demo = Account {
            remote_key: DEMO_REMOTE_KEY.to_string(),
            totp: None,
            user: User {
                id: 12345,
                username: "testuser".to_string(),
                email: "test@example.com".to_string(),
            },
        };
        Self {
            accounts: Arc::new(RwLock::new(HashMap::from([(
                DEMO_USERNAME.to_string(),
                demo,
            )]))),
            ..Self::default()
        }
    }

    pub async fn add_account(&self, username: &str, account: Account) {
        self.accounts
            .write()
            .await
            .insert(username.to_string(), account);
    }

    /// Answer the next `times` requests to `path` with `status`, before any
    /// routing or authentication happens.
    pub fn fail_next(&self, path: &str, status: u16, times: usize) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults
            .entry(path.to_string())
            .or_default()
            .extend(std::iter::repeat(status).take(times));
    }

    /// Invalidate every issued token, as if all sessions expired server-side.
    pub async fn revoke_tokens(&self) {
        self.tokens.write().await.clear();
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Requests that reached `path`, including ones answered by a fault.
    pub fn hits(&self, path: &str) -> u32 {
        let hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        hits.get(path).copied().unwrap_or(0)
    }

    fn record_hit(&self, path: &str) -> Option<u16> {
        {
            let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
            *hits.entry(path.to_string()).or_default() += 1;
        }
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.get_mut(path).and_then(VecDeque::pop_front)
    }

    async fn issue_token(&self, username: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), username.to_string());
        token
    }

    /// Resolve the `X-Client-Token` header to its account's user record.
    async fn authorize(&self, headers: &HeaderMap) -> Result<User, Response> {
        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let username = self.tokens.read().await.get(token).cloned();
        let user = match username {
            Some(username) => self
                .accounts
                .read()
                .await
                .get(&username)
                .map(|a| a.user.clone()),
            None => None,
        };
        user.ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Unauthenticated"))
    }
}

pub fn app() -> Router {
    app_with_state(MockState::new())
}

pub fn app_with_state(state: MockState) -> Router {
    Router::new()
        .route("/auth/login.json", post(login))
        .route("/auth/refresh_token.json", post(refresh_token))
        .route("/auth/curr_user.json", get(current_user))
        .route("/checklists.json", get(list_checklists).post(create_checklist))
        .route("/checklists/{file}", get(get_checklist))
        .layer(middleware::from_fn_with_state(state.clone(), inject_faults))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, MockState::new()).await
}

pub async fn serve(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

/// Bind a random local port and serve `state` on it in the background.
pub async fn spawn(state: MockState) -> Result<SocketAddr, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = serve(listener, state).await {
            tracing::error!(error = %err, "mock server stopped");
        }
    });
    Ok(addr)
}

/// JSON error body plus a fresh correlation id, like the real service.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let mut response = (status, Json(serde_json::json!({ "error": message }))).into_response();
    if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    response
}

async fn inject_faults(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if let Some(code) = state.record_hit(&path) {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::debug!(%path, status = code, "injected fault");
        return error_response(status, "injected fault");
    }
    next.run(request).await
}

async fn login(State(state): State<MockState>, Form(form): Form<LoginForm>) -> Response {
    state.logins.fetch_add(1, Ordering::SeqCst);
    let account = state.accounts.read().await.get(&form.username).cloned();
    let Some(account) = account else {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid credentials");
    };
    if account.remote_key != form.remote_key {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    if account.totp.is_some() && account.totp != form.totp {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid second factor");
    }
    let token = state.issue_token(&form.username).await;
    Json(TokenBody { token }).into_response()
}

async fn refresh_token(State(state): State<MockState>, Form(form): Form<RefreshForm>) -> Response {
    state.refreshes.fetch_add(1, Ordering::SeqCst);
    let username = state.tokens.write().await.remove(&form.old_token);
    let Some(username) = username else {
        return error_response(StatusCode::UNAUTHORIZED, "Unknown token");
    };
    let token = state.issue_token(&username).await;
    Json(TokenBody { token }).into_response()
}

async fn current_user(State(state): State<MockState>, headers: HeaderMap) -> Response {
    match state.authorize(&headers).await {
        Ok(user) => Json(user).into_response(),
        Err(resp) => resp,
    }
}

async fn list_checklists(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if let Err(resp) = state.authorize(&headers).await {
        return resp;
    }
    let checklists = state.checklists.read().await;
    let mut all: Vec<Checklist> = checklists.values().cloned().collect();
    all.sort_by_key(|c| c.id);
    Json(all).into_response()
}

async fn create_checklist(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(resp) = state.authorize(&headers).await {
        return resp;
    }
    let Ok(input) = serde_json::from_str::<CreateChecklist>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Malformed checklist");
    };
    let checklist = Checklist {
        id: state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        name: input.checklist.name,
        public: input.checklist.public,
        task_count: 0,
    };
    state
        .checklists
        .write()
        .await
        .insert(checklist.id, checklist.clone());
    Json(checklist).into_response()
}

async fn get_checklist(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> Response {
    if let Err(resp) = state.authorize(&headers).await {
        return resp;
    }
    let Some(id) = file
        .strip_suffix(".json")
        .and_then(|id| id.parse::<u64>().ok())
    else {
        return error_response(StatusCode::BAD_REQUEST, "Malformed checklist id");
    };
    match state.checklists.read().await.get(&id) {
        Some(checklist) => Json(checklist.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Checklist not found"),
    }
}
