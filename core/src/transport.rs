//! Default `Transport` backed by a blocking `ureq` agent.
//!
//! Each request runs on tokio's blocking pool. When the engine abandons a
//! send because the caller's context stopped, the blocking call finishes in
//! the background and its result is discarded; the per-request timeout bounds
//! how long that can take.

use std::time::Duration;

use async_trait::async_trait;

use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

/// Per-request timeout of the default agent.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl UreqTransport {
    pub fn with_timeout(timeout: Duration) -> Self {
        // Non-2xx responses come back as data so the classifier can see them.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }

    fn execute(agent: &ureq::Agent, req: HttpRequest) -> Result<HttpResponse, ureq::Error> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = req;

        let mut response = match method {
            HttpMethod::Get | HttpMethod::Delete => {
                let mut builder = if method == HttpMethod::Get {
                    agent.get(&url)
                } else {
                    agent.delete(&url)
                };
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.call()?
            }
            HttpMethod::Post | HttpMethod::Put => {
                let mut builder = if method == HttpMethod::Post {
                    agent.post(&url)
                } else {
                    agent.put(&url)
                };
                for (name, value) in &headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                match body {
                    Some(body) => builder.send(body.as_bytes())?,
                    None => builder.send_empty()?,
                }
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.body_mut().read_to_string()?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || Self::execute(&agent, request))
            .await
            .map_err(|e| TransportError::new(format!("transport task failed: {e}")))?
            .map_err(|e| TransportError::new(e.to_string()))
    }
}
