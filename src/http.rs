//! Shared HTTP retry policy for embedding and generation providers.
//!
//! HTTP 429 and 5xx responses are retried after the server's `retry-after`
//! hint (seconds), or an exponential backoff starting at one second when
//! no hint is given. Any other failure is returned immediately as a
//! [`PipelineError::Provider`].

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::header::HeaderMap;
use tracing::warn;

use crate::error::{is_retryable, PipelineError};

const BASE_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;

/// Delay before the next attempt: the `retry-after` header when it holds a
/// number of seconds, else `1s << attempt`.
pub fn retry_delay(headers: &HeaderMap, attempt: u32) -> Duration {
    if let Some(secs) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(MAX_BACKOFF_SECS));
    }
    Duration::from_secs((BASE_BACKOFF_SECS << attempt.min(5)).min(MAX_BACKOFF_SECS))
}

/// Send a request built by `f`, retrying up to `max_retries` times on
/// 429/5xx. Returns the first successful response.
pub async fn send_with_retry<F, Fut>(
    provider: &str,
    max_retries: u32,
    mut f: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = f().await.map_err(|e| PipelineError::Provider {
            provider: provider.to_string(),
            status: None,
            message: e.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        if is_retryable(code) && attempt < max_retries {
            let delay = retry_delay(response.headers(), attempt);
            warn!(
                provider,
                status = code,
                delay_secs = delay.as_secs(),
                "provider request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(PipelineError::Provider {
            provider: provider.to_string(),
            status: Some(code),
            message: body.chars().take(500).collect(),
        }
        .into());
    }
}
