//! Access-token lifecycle: login, proactive refresh, fallback re-login.
//!
//! # Design
//! The credential state lives behind a `RwLock` that is only ever held for a
//! field read or a field write, never across a network exchange. Exchanges
//! are serialized by a separate gate so that a burst of callers arriving while
//! the client is unauthenticated produces one login: late arrivals wait on the
//! gate, then re-read the state and find a fresh token. Readers of the current
//! token never wait on the gate.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::context::Context;
use crate::error::{ApiError, Error, ErrorKind, Result};
use crate::http::{HttpMethod, HttpRequest, Transport};
use crate::retry::send_with_retry;

pub const LOGIN_PATH: &str = "/auth/login.json";
pub const REFRESH_PATH: &str = "/auth/refresh_token.json";

/// Tokens are refreshed once they are this close to expiring.
pub const RENEWAL_HORIZON: Duration = Duration::from_secs(60 * 60);

/// Lifetime the service grants a freshly issued token.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Default)]
struct CredentialState {
    token: String,
    expires_at: Option<Instant>,
}

/// What `ensure_valid` has to do for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Renewal {
    None,
    Refresh,
    Login,
}

impl CredentialState {
    fn renewal(&self, now: Instant) -> Renewal {
        if self.token.is_empty() {
            return Renewal::Login;
        }
        match self.expires_at {
            None => Renewal::Login,
            Some(at) if at <= now => Renewal::Login,
            Some(at) if at.saturating_duration_since(now) < RENEWAL_HORIZON => Renewal::Refresh,
            Some(_) => Renewal::None,
        }
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

/// Primary credentials for the login exchange.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub remote_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("remote_key", &"<redacted>")
            .finish()
    }
}

pub struct TokenManager {
    credentials: Credentials,
    base_url: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    state: RwLock<CredentialState>,
    exchange_gate: Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.credentials)
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        credentials: Credentials,
        base_url: &str,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            policy,
            state: RwLock::new(CredentialState::default()),
            exchange_gate: Mutex::new(()),
        }
    }

    /// The token to attach to a request. Empty while unauthenticated.
    pub async fn current(&self) -> String {
        self.state.read().await.token.clone()
    }

    /// Whether a usable, non-expiring token is held right now.
    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.renewal(Instant::now()) != Renewal::Login
    }

    /// Make sure a usable token is held, logging in or refreshing as needed.
    pub async fn ensure_valid(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        if self.state.read().await.renewal(Instant::now()) == Renewal::None {
            return Ok(());
        }

        let _gate = ctx.run(self.exchange_gate.lock()).await?;

        // Another caller may have renewed while we waited for the gate.
        let snapshot = self.state.read().await.clone();
        match snapshot.renewal(Instant::now()) {
            Renewal::None => Ok(()),
            Renewal::Login => self.login_exchange(ctx, None).await,
            Renewal::Refresh => self.refresh_or_login(ctx, &snapshot.token).await,
        }
    }

    /// Log in unconditionally, replacing any held token.
    pub async fn login(&self, ctx: &Context) -> Result<()> {
        let _gate = ctx.run(self.exchange_gate.lock()).await?;
        self.login_exchange(ctx, None).await
    }

    /// Log in with a one-time second-factor code.
    pub async fn login_with_second_factor(&self, ctx: &Context, code: &str) -> Result<()> {
        let _gate = ctx.run(self.exchange_gate.lock()).await?;
        self.login_exchange(ctx, Some(code)).await
    }

    /// Refresh the held token now, falling back to login when that fails
    /// or when there is nothing to refresh.
    pub async fn refresh(&self, ctx: &Context) -> Result<()> {
        let _gate = ctx.run(self.exchange_gate.lock()).await?;
        let token = self.current().await;
        if token.is_empty() {
            return self.login_exchange(ctx, None).await;
        }
        self.refresh_or_login(ctx, &token).await
    }

    async fn refresh_or_login(&self, ctx: &Context, old_token: &str) -> Result<()> {
        let form = [("old_token", old_token)];
        match self.exchange(ctx, REFRESH_PATH, &form).await {
            Ok(token) => {
                self.store(token).await;
                info!("access token refreshed");
                Ok(())
            }
            Err(Error::Cancelled(reason)) => Err(reason.into()),
            Err(err) => {
                warn!(error = %err, "token refresh failed, falling back to login");
                self.login_exchange(ctx, None).await
            }
        }
    }

    async fn login_exchange(&self, ctx: &Context, second_factor: Option<&str>) -> Result<()> {
        let mut form = vec![
            ("username", self.credentials.username.as_str()),
            ("remote_key", self.credentials.remote_key.as_str()),
        ];
        if let Some(code) = second_factor {
            form.push(("totp", code));
        }
        let token = self.exchange(ctx, LOGIN_PATH, &form).await?;
        self.store(token).await;
        info!(username = %self.credentials.username, "logged in");
        Ok(())
    }

    /// One form-encoded POST to an auth endpoint, retried like any data call.
    /// No lock is held here.
    async fn exchange(&self, ctx: &Context, path: &str, form: &[(&str, &str)]) -> Result<String> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let request = HttpRequest::new(HttpMethod::Post, format!("{}{path}", self.base_url))
            .header("Content-Type", FORM_CONTENT_TYPE)
            .body(body);
        debug!(%path, "token exchange");

        let response = send_with_retry(ctx, self.transport.as_ref(), &self.policy, || {
            std::future::ready(request.clone())
        })
        .await?;

        let auth: AuthResponse =
            serde_json::from_str(&response.body).map_err(Error::DeserializationError)?;
        if auth.token.is_empty() {
            return Err(ApiError::new(
                response.status,
                ErrorKind::Unspecified,
                "authentication response carried an empty token",
            )
            .into());
        }
        Ok(auth.token)
    }

    /// Overwrite both fields in one exclusive section.
    async fn store(&self, token: String) {
        let mut state = self.state.write().await;
        state.token = token;
        state.expires_at = Some(Instant::now() + TOKEN_LIFETIME);
    }
}
