//! Client configuration, validated once at construction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::RetryPolicy;
use crate::error::{Error, Result};
use crate::http::Transport;

pub const DEFAULT_BASE_URL: &str = "https://checkvist.com";

#[derive(Clone)]
pub struct ClientConfig {
    /// Service root; endpoint paths are appended to it.
    pub base_url: String,
    pub retry: RetryPolicy,
    /// Bound on the wall-clock time of one logical call, covering
    /// authentication, every attempt and every backoff sleep.
    pub timeout: Option<Duration>,
    /// Custom transport. `None` selects `UreqTransport`.
    pub transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            timeout: None,
            transport: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("base URL {:?}: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base URL {:?} must use http or https",
                self.base_url
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(Error::Config(format!(
                "base URL {:?} must not carry a query or fragment",
                self.base_url
            )));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("timeout must be positive".into()));
        }
        self.retry.validate()
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub(crate) fn root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
