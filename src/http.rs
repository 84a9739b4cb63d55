use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::KiraError;

pub const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// A request that still failed after every retry.
#[derive(Debug)]
pub struct SendFailure {
    pub attempts: usize,
    pub error: reqwest::Error,
}

/// Blocking client with the crate user agent. `None` disables the total
/// request timeout, which archive downloads need.
pub fn build_client(timeout: Option<Duration>) -> Result<Client, KiraError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("kira-qtl/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| KiraError::DownloadHttp(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .map_err(|err| KiraError::DownloadHttp(err.to_string()))
}

/// Sends the request built by `make_req`, retrying transient failures with a
/// linear backoff. A retryable status is returned as-is once retries run out.
pub fn send_with_retries<F>(
    max_retries: usize,
    mut make_req: F,
) -> Result<Response, SendFailure>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        let response = make_req().send();
        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < max_retries && is_retryable_status(status) {
                    tracing::debug!(status, attempt, "retrying request");
                    thread::sleep(retry_delay(attempt));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < max_retries && is_retryable_error(&err) {
                    tracing::debug!(error = %err, attempt, "retrying request");
                    thread::sleep(retry_delay(attempt));
                    attempt += 1;
                    continue;
                }
                return Err(SendFailure {
                    attempts: attempt + 1,
                    error: err,
                });
            }
        }
    }
}

/// Linear backoff before retry number `attempt + 1`.
pub fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1))
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
