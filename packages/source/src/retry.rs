//! HTTP retry helper for remote dataset downloads.
//!
//! Remote CSV locators are fetched through [`send_bytes`], which retries
//! transient failures (timeouts, connection resets, HTTP 429 and 5xx) with
//! exponential backoff. HTTP 4xx other than 429 is permanent.

use std::time::Duration;

use crate::SourceError;

/// Maximum number of retry attempts for transient HTTP errors.
///
/// With exponential backoff (2s, 4s, 8s) the total wait before giving up is
/// 14 seconds.
const MAX_RETRIES: u32 = 3;

/// Sends an HTTP request and returns the response body.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`], since builders are consumed by
/// `.send()`.
///
/// # Errors
///
/// Returns [`SourceError::Unavailable`] if the request fails after all
/// retries, the server answers with a non-retryable status code, or the
/// body cannot be read.
#[allow(clippy::future_not_send)]
pub async fn send_bytes<F>(url: &str, build_request: F) -> Result<Vec<u8>, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let unavailable = |message: String| SourceError::Unavailable {
        locator: url.to_string(),
        message,
    };

    let mut last_error = String::from("request failed after all retries");

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt);
            log::warn!("  retry {attempt}/{MAX_RETRIES} for {url} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) if is_transient(&e) && attempt < MAX_RETRIES => {
                log::warn!("  transient error: {e}");
                last_error = e.to_string();
                continue;
            }
            Err(e) => return Err(unavailable(e.to_string())),
        };

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            if attempt < MAX_RETRIES {
                log::warn!("  HTTP {status}");
                last_error = format!("HTTP {status}");
                continue;
            }
            return Err(unavailable(format!(
                "HTTP {status} after {MAX_RETRIES} retries"
            )));
        }

        if status.is_client_error() {
            return Err(unavailable(format!("HTTP {status}")));
        }

        match response.bytes().await {
            Ok(bytes) => {
                log::debug!("Downloaded {} bytes from {url}", bytes.len());
                return Ok(bytes.to_vec());
            }
            Err(e) if attempt < MAX_RETRIES => {
                log::warn!("  body read failed: {e}");
                last_error = e.to_string();
            }
            Err(e) => return Err(unavailable(e.to_string())),
        }
    }

    Err(unavailable(last_error))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
