//! Authenticated request engine for the Checkvist API.
//!
//! # Overview
//! Manages a renewable access token and wraps every outbound call in
//! classification-aware retry with exponential backoff, all under a
//! caller-supplied cancellation `Context`. Resource-specific endpoint code
//! sits on top of `CheckvistClient::execute` and never deals with tokens,
//! retries or deadlines itself.
//!
//! # Design
//! - `classify` and `backoff` are pure: status/transport outcome in, verdict
//!   or delay out.
//! - `token::TokenManager` owns the credential state behind a reader/writer
//!   lock and never holds that lock across network I/O.
//! - `retry::send_with_retry` is the single retry loop, used both for data
//!   calls and for the login/refresh exchanges.
//! - Requests and responses are plain data (`http`), executed by a pluggable
//!   `Transport`; `UreqTransport` is the default.
//!
//! ```no_run
//! use checkvist_core::{CheckvistClient, Context};
//!
//! # async fn demo() -> checkvist_core::Result<()> {
//! let client = CheckvistClient::new("user@example.com", "remote-key");
//! let ctx = Context::background().with_timeout(std::time::Duration::from_secs(10));
//! let lists: Vec<serde_json::Value> = client.get(&ctx, "/checklists.json").await?;
//! # let _ = lists;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod classify;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod retry;
pub mod token;
pub mod transport;
pub mod types;

pub use backoff::RetryPolicy;
pub use classify::{classify, classify_status, AttemptError, Outcome};
pub use client::CheckvistClient;
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use context::{Cancelled, Context};
pub use error::{ApiError, Error, ErrorKind, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
pub use token::{Credentials, TokenManager};
pub use transport::UreqTransport;
pub use types::User;
