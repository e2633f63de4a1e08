//! Bounded retry around an [`HttpTransport`].

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::capabilities::{HttpError, HttpRequest, HttpResult, HttpTransport};

pub const ACCEPT_LANGUAGE: &str = "en";
pub const REQUESTED_WITH: &str = "SmartInfoQueue-App";

/// Executes requests with the retry policy they carry.
///
/// A 429 or a transport failure is retried while the budget lasts, waiting
/// `initial_backoff_ms` and doubling after every wait. Any other non-2xx
/// status fails at once. Both kinds of retry draw on the same budget.
#[derive(Clone)]
pub struct ResilientFetch {
    transport: Arc<dyn HttpTransport>,
}

impl ResilientFetch {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    #[instrument(
        skip(self, request),
        fields(
            request_id = %request.request_id(),
            method = request.method().as_str(),
            host = %request.url().host(),
        )
    )]
    pub async fn execute(&self, request: HttpRequest) -> HttpResult {
        let request = with_identification(request)?;
        let policy = request.retry_policy().clone();
        let mut retry = 0u32;

        loop {
            let attempt = retry + 1;
            debug!(attempt, "sending request");

            let outcome =
                match tokio::time::timeout(request.timeout(), self.transport.send(&request)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HttpError::Timeout {
                        timeout_ms: u64::try_from(request.timeout().as_millis())
                            .unwrap_or(u64::MAX),
                    }),
                };

            let error = match outcome {
                Ok(response) if response.is_success() => {
                    debug!(attempt, status = response.status(), "request succeeded");
                    return Ok(response);
                }
                Ok(response) => HttpError::from_response(&response),
                Err(e) => e,
            };

            let retryable = error.is_rate_limited() || error.is_transport();
            if !retryable || retry >= policy.max_retries {
                warn!(attempt, error = %error, "request failed");
                return Err(error);
            }

            let wait = policy.backoff_for(retry);
            warn!(
                attempt,
                error = %error,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "retrying request"
            );
            tokio::time::sleep(wait).await;
            retry += 1;
        }
    }
}

fn with_identification(mut request: HttpRequest) -> Result<HttpRequest, HttpError> {
    let headers = request.headers_mut();
    headers.insert("Accept-Language", ACCEPT_LANGUAGE)?;
    headers.insert("X-Requested-With", REQUESTED_WITH)?;
    Ok(request)
}
