//! Retry loop shared by data calls and token exchanges.

use std::future::Future;

use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::classify::{classify, AttemptError, Outcome};
use crate::context::Context;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse, Transport};

const MAX_LOG_BODY_CHARS: usize = 512;

/// Send a request built fresh by `build` for each attempt, retrying
/// retryable failures under `policy`.
///
/// Makes at most `policy.max_retries + 1` round trips. On exhaustion the last
/// attempt's error is returned as-is. The context is observed during every
/// round trip and every backoff sleep.
pub async fn send_with_retry<F, Fut>(
    ctx: &Context,
    transport: &dyn Transport,
    policy: &RetryPolicy,
    mut build: F,
) -> Result<HttpResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HttpRequest>,
{
    let mut attempt: u32 = 0;
    loop {
        let request = build().await;
        let method = request.method;
        let url = request.url.clone();
        debug!(%method, %url, attempt, "sending request");

        let result = match ctx.run(transport.send(request)).await {
            Err(reason) => Err(AttemptError::Cancelled(reason)),
            // A transport error raised because the deadline hit is a cancellation.
            Ok(Err(err)) => match ctx.check() {
                Err(reason) => Err(AttemptError::Cancelled(reason)),
                Ok(()) => Err(AttemptError::Transport(err)),
            },
            Ok(Ok(response)) => {
                log_response(&response);
                Ok(response)
            }
        };

        match classify(result) {
            Outcome::Success(response) => return Ok(response),
            Outcome::Cancelled(reason) => {
                debug!(%method, %url, attempt, %reason, "request cancelled");
                return Err(reason.into());
            }
            Outcome::Fatal(err) => return Err(err.into()),
            Outcome::Retryable(err) => {
                if attempt >= policy.max_retries {
                    warn!(
                        %method, %url, attempt, kind = %err.kind, status = err.status,
                        "retry budget exhausted"
                    );
                    return Err(err.into());
                }
                attempt += 1;
                let delay = policy.delay(attempt)?;
                warn!(
                    %method, %url, attempt, kind = %err.kind, status = err.status,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure, backing off"
                );
                ctx.sleep(delay).await?;
            }
        }
    }
}

fn log_response(response: &HttpResponse) {
    if response.is_success() {
        debug!(status = response.status, "response received");
        return;
    }

    let mut preview = response
        .body
        .chars()
        .take(MAX_LOG_BODY_CHARS)
        .collect::<String>();
    if response.body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    debug!(status = response.status, body = %preview, "error response received");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::http::{HttpMethod, TransportError};

    /// Replays a fixed list of results, then repeats the last one.
    struct Script {
        steps: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(steps: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for Script {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    fn request() -> std::future::Ready<HttpRequest> {
        std::future::ready(HttpRequest::new(HttpMethod::Get, "http://svc/test"))
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let script = Script::new(vec![
            Err(TransportError::new("connection reset")),
            Ok(HttpResponse::new(200, "{}")),
        ]);
        let resp = send_with_retry(&Context::background(), &script, &policy(3), request)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test]
    async fn zero_retries_fails_on_first_error() {
        let script = Script::new(vec![Ok(HttpResponse::new(500, ""))]);
        let err = send_with_retry(&Context::background(), &script, &policy(0), request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ServerError));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn fatal_status_stops_immediately() {
        let script = Script::new(vec![
            Ok(HttpResponse::new(401, "")),
            Ok(HttpResponse::new(200, "")),
        ]);
        let err = send_with_retry(&Context::background(), &script, &policy(5), request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unauthorized));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_last_attempt_error() {
        let script = Script::new(vec![
            Ok(HttpResponse::new(503, "first")),
            Err(TransportError::new("dns failure")),
        ]);
        let err = send_with_retry(&Context::background(), &script, &policy(2), request)
            .await
            .unwrap_err();
        match err {
            Error::Api(api) => {
                assert_eq!(api.kind, ErrorKind::Transport);
                assert_eq!(api.message, "dns failure");
            }
            other => panic!("expected api error, got {other:?}"),
        }
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_context_sends_nothing() {
        let script = Script::new(vec![Ok(HttpResponse::new(200, ""))]);
        let ctx = Context::background();
        ctx.cancel();
        let err = send_with_retry(&ctx, &script, &policy(3), request)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(script.calls(), 0);
    }
}
