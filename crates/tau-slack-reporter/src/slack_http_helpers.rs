//! Shared HTTP plumbing for the Slack Web API and webhook clients.

use std::time::Duration;

use anyhow::{bail, Context, Result};

pub(crate) const RETRY_ATTEMPT_HEADER: &str = "x-tau-retry-attempt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Bounded retry settings applied by a single HTTP client.
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: usize,
    pub(crate) base_delay_ms: u64,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay_ms.max(1),
        }
    }
}

pub(crate) fn build_http_client(user_agent: &'static str, timeout_ms: u64) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_static(user_agent),
    );
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_millis(timeout_ms.max(1)))
        .build()
        .context("failed to create slack http client")
}

/// Sends a request, retrying rate limits, server errors and transient
/// transport failures. Returns the first successful response.
pub(crate) async fn send_with_retry<F>(
    operation: &str,
    policy: RetryPolicy,
    mut builder: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut attempt = 0_usize;
    loop {
        attempt = attempt.saturating_add(1);
        let response = builder()
            .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
            .send()
            .await;
        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                if attempt < policy.max_attempts && is_retryable_slack_status(status.as_u16()) {
                    tracing::debug!(
                        operation,
                        attempt,
                        status = status.as_u16(),
                        "retrying slack request"
                    );
                    tokio::time::sleep(retry_delay(policy.base_delay_ms, attempt, retry_after))
                        .await;
                    continue;
                }

                bail!(
                    "slack api {operation} failed with status {}: {}",
                    status.as_u16(),
                    truncate_for_error(&body, 800)
                );
            }
            Err(error) => {
                if attempt < policy.max_attempts && is_retryable_transport_error(&error) {
                    tokio::time::sleep(retry_delay(policy.base_delay_ms, attempt, None)).await;
                    continue;
                }
                return Err(error).with_context(|| format!("slack api {operation} request failed"));
            }
        }
    }
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

pub(crate) fn retry_delay(
    base_delay_ms: u64,
    attempt: usize,
    retry_after_seconds: Option<u64>,
) -> Duration {
    if let Some(retry_after_seconds) = retry_after_seconds {
        return Duration::from_secs(retry_after_seconds);
    }
    let exponent = attempt.saturating_sub(1).min(6) as u32;
    let scale = 2_u64.pow(exponent);
    Duration::from_millis(base_delay_ms.max(1).saturating_mul(scale))
}

pub(crate) fn is_retryable_slack_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub(crate) fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

pub(crate) fn truncate_for_error(value: &str, max_chars: usize) -> String {
    truncate_for_slack(value, max_chars)
}

/// Truncates on character boundaries and marks the cut with an ellipsis.
pub(crate) fn truncate_for_slack(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        is_retryable_slack_status, parse_retry_after, retry_delay, truncate_for_slack, RetryPolicy,
    };
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
    use std::time::Duration;

    #[test]
    fn unit_parse_retry_after_accepts_numeric_and_rejects_invalid_values() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("15"));
        assert_eq!(parse_retry_after(&headers), Some(15));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn unit_retry_delay_prefers_retry_after_and_backs_off_exponentially() {
        assert_eq!(retry_delay(50, 1, Some(3)), Duration::from_secs(3));
        assert_eq!(retry_delay(100, 1, None), Duration::from_millis(100));
        assert_eq!(retry_delay(100, 3, None), Duration::from_millis(400));
        assert_eq!(retry_delay(100, 40, None), Duration::from_millis(6_400));
    }

    #[test]
    fn unit_retry_policy_clamps_zero_values() {
        let policy = RetryPolicy::new(0, 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
    }

    #[test]
    fn unit_is_retryable_slack_status_handles_rate_limit_and_server_errors() {
        assert!(is_retryable_slack_status(429));
        assert!(is_retryable_slack_status(502));
        assert!(!is_retryable_slack_status(400));
        assert!(!is_retryable_slack_status(403));
    }

    #[test]
    fn regression_truncate_for_slack_preserves_unicode_boundaries() {
        let value = "ok✅done";
        assert_eq!(truncate_for_slack(value, 20), value);
        assert_eq!(truncate_for_slack(value, 3), "ok✅...");
        assert_eq!(truncate_for_slack(value, 0), "...");
    }
}
