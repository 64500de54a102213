//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkvist_core::{
    CheckvistClient, ClientConfig, HttpRequest, HttpResponse, RetryPolicy, Transport,
    TransportError,
};

pub type Step = Result<HttpResponse, TransportError>;

/// Answers `/auth/*` with a token and every other path from a script. The
/// last scripted step repeats forever.
pub struct ScriptedTransport {
    login: Mutex<VecDeque<Step>>,
    data: Mutex<VecDeque<Step>>,
    latency: Option<Duration>,
    pub logins: AtomicU32,
    pub refreshes: AtomicU32,
    pub data_attempts: AtomicU32,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(data: Vec<Step>) -> Arc<Self> {
        Self::build(data, None)
    }

    pub fn with_latency(data: Vec<Step>, latency: Duration) -> Arc<Self> {
        Self::build(data, Some(latency))
    }

    fn build(data: Vec<Step>, latency: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            login: Mutex::new(VecDeque::new()),
            data: Mutex::new(data.into()),
            latency,
            logins: AtomicU32::new(0),
            refreshes: AtomicU32::new(0),
            data_attempts: AtomicU32::new(0),
            seen_tokens: Mutex::new(Vec::new()),
        })
    }

    /// Script the login endpoint; defaults to success.
    pub fn script_login(&self, steps: Vec<Step>) {
        *self.login.lock().unwrap() = steps.into();
    }

    pub fn attempts(&self) -> u32 {
        self.data_attempts.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    fn next(queue: &Mutex<VecDeque<Step>>) -> Option<Step> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if request.url.ends_with("/auth/login.json") {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            return Self::next(&self.login)
                .unwrap_or_else(|| Ok(ok(&format!(r#"{{"token":"token-{n}"}}"#))));
        }
        if request.url.ends_with("/auth/refresh_token.json") {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(ok(&format!(r#"{{"token":"refreshed-{n}"}}"#)));
        }
        self.data_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = request.header_value("X-Client-Token") {
            self.seen_tokens.lock().unwrap().push(token.to_string());
        }
        Self::next(&self.data).unwrap_or_else(|| Ok(ok("{}")))
    }
}

pub fn ok(body: &str) -> HttpResponse {
    HttpResponse::new(200, body)
}

pub fn status(code: u16) -> Step {
    Ok(HttpResponse::new(code, format!(r#"{{"error":"status {code}"}}"#)))
}

pub fn fixed_policy(max_retries: u32, base_ms: u64, max_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(base_ms),
        max_delay: Duration::from_millis(max_ms),
        jitter: false,
    }
}

pub fn client_with(transport: Arc<ScriptedTransport>, policy: RetryPolicy) -> CheckvistClient {
    CheckvistClient::with_config(
        "user@example.com",
        "api-key",
        ClientConfig::default()
            .with_base_url("http://checkvist.test")
            .with_transport(transport)
            .with_retry_policy(policy),
    )
    .unwrap()
}
