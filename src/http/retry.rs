//! Retry policy for index downloads.

use reqwest::StatusCode;

/// Maximum number of attempts for a network operation.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// A 4xx response other than throttling; asking again will not help.
#[derive(Debug, thiserror::Error)]
#[error("HTTP {status} from {url}")]
pub struct NonRetryableError {
    pub status: u16,
    pub url: String,
}

/// Wraps an `error_for_status()` failure, marking client errors non-retryable.
///
/// Connection failures, timeouts, 429 and 5xx stay retryable.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match error.status() {
        Some(status) if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
            let url = error
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "request".to_string());
            NonRetryableError {
                status: status.as_u16(),
                url,
            }
            .into()
        }
        _ => anyhow::Error::from(error),
    }
}
