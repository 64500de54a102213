//! Authenticated request executor for the Checkvist API.
//!
//! # Design
//! `CheckvistClient` is a cheap handle around shared state: the validated
//! configuration, the transport and the `TokenManager`. Clones share one
//! credential state, so concurrent calls from many tasks reuse one token.
//! Endpoint-specific code lives outside this crate and goes through
//! `execute` (or the JSON verbs built on it) with a method, a path relative
//! to the base URL and an optional pre-serialized body.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::retry::send_with_retry;
use crate::token::{Credentials, TokenManager};
use crate::transport::UreqTransport;
use crate::types::User;

/// Request header carrying the access token.
pub const TOKEN_HEADER: &str = "X-Client-Token";

pub const CURRENT_USER_PATH: &str = "/auth/curr_user.json";

#[derive(Clone)]
pub struct CheckvistClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tokens: TokenManager,
}

impl fmt::Debug for CheckvistClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckvistClient")
            .field("config", &self.inner.config)
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}

impl CheckvistClient {
    /// Client for the public service with default retry tuning.
    pub fn new(username: &str, remote_key: &str) -> Self {
        Self::build(username, remote_key, ClientConfig::default())
    }

    /// Client with a custom configuration. Fails if the configuration is
    /// invalid.
    pub fn with_config(username: &str, remote_key: &str, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(username, remote_key, config))
    }

    fn build(username: &str, remote_key: &str, config: ClientConfig) -> Self {
        let transport: Arc<dyn Transport> = match &config.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(UreqTransport::default()),
        };
        let tokens = TokenManager::new(
            Credentials {
                username: username.to_string(),
                remote_key: remote_key.to_string(),
            },
            config.root(),
            transport.clone(),
            config.retry,
        );
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                tokens,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Authenticate eagerly instead of on the first call.
    pub async fn login(&self, ctx: &Context) -> Result<()> {
        let ctx = self.call_context(ctx);
        self.inner.tokens.login(&ctx).await
    }

    /// Authenticate eagerly with a one-time second-factor code.
    pub async fn login_with_second_factor(&self, ctx: &Context, code: &str) -> Result<()> {
        let ctx = self.call_context(ctx);
        self.inner.tokens.login_with_second_factor(&ctx, code).await
    }

    /// Trade the held token for a fresh one.
    pub async fn refresh(&self, ctx: &Context) -> Result<()> {
        let ctx = self.call_context(ctx);
        self.inner.tokens.refresh(&ctx).await
    }

    /// The token currently attached to requests; empty before the first login.
    pub async fn current_token(&self) -> String {
        self.inner.tokens.current().await
    }

    pub async fn current_user(&self, ctx: &Context) -> Result<User> {
        self.get(ctx, CURRENT_USER_PATH).await
    }

    /// Run one logical call and decode the JSON response into `T`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<T> {
        let response = self.execute_raw(ctx, method, path, body).await?;
        serde_json::from_str(&response.body).map_err(Error::DeserializationError)
    }

    /// Run one logical call, discarding the response body.
    pub async fn execute_unit(
        &self,
        ctx: &Context,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<()> {
        self.execute_raw(ctx, method, path, body).await.map(|_| ())
    }

    /// Run one logical call and hand back the successful response untouched.
    pub async fn execute_raw(
        &self,
        ctx: &Context,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let ctx = self.call_context(ctx);
        self.inner.tokens.ensure_valid(&ctx).await?;

        let url = format!("{}{}", self.inner.config.root(), path);
        let tokens = &self.inner.tokens;
        let (url, body) = (&url, &body);
        debug!(%method, %url, "executing call");

        send_with_retry(
            &ctx,
            self.inner.transport.as_ref(),
            &self.inner.config.retry,
            move || async move {
                let token = tokens.current().await;
                let mut request =
                    HttpRequest::new(method, url.as_str()).header(TOKEN_HEADER, token);
                if let Some(body) = body {
                    request = request
                        .header("Content-Type", "application/json")
                        .body(body.as_str());
                }
                request
            },
        )
        .await
    }

    pub async fn get<T: DeserializeOwned>(&self, ctx: &Context, path: &str) -> Result<T> {
        self.execute(ctx, HttpMethod::Get, path, None).await
    }

    pub async fn post<B, T>(&self, ctx: &Context, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(encode).transpose()?;
        self.execute(ctx, HttpMethod::Post, path, body).await
    }

    pub async fn put<B, T>(&self, ctx: &Context, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        self.execute(ctx, HttpMethod::Put, path, Some(body)).await
    }

    pub async fn delete(&self, ctx: &Context, path: &str) -> Result<()> {
        self.execute_unit(ctx, HttpMethod::Delete, path, None).await
    }

    /// Apply the per-client timeout on top of the caller's context.
    fn call_context(&self, ctx: &Context) -> Context {
        match self.inner.config.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        }
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<String> {
    serde_json::to_string(body).map_err(Error::SerializationError)
}
