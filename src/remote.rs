//! JSON-over-HTTP calls shared by the store, embedding, and generation adapters.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Build a client with a per-request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RemoteError::Transport(e.to_string()))
}

/// Send the request produced by `build`, retrying transient failures.
///
/// `build` is called once per attempt. An empty success body decodes to
/// `Value::Null`.
pub async fn send_json<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value, RemoteError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err: Option<RemoteError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            let reason = last_err
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            warn!(
                call = label,
                attempt,
                delay_secs = delay.as_secs(),
                error = %reason,
                "retrying remote call"
            );
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let text = response
                        .text()
                        .await
                        .map_err(|e| RemoteError::Decode(e.to_string()))?;
                    if text.trim().is_empty() {
                        return Ok(serde_json::Value::Null);
                    }
                    return serde_json::from_str(&text)
                        .map_err(|e| RemoteError::Decode(e.to_string()));
                }

                let body = response.text().await.unwrap_or_default();
                let err = RemoteError::Status {
                    status: status.as_u16(),
                    body,
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                last_err = Some(RemoteError::Transport(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| RemoteError::Transport(format!("{} failed after retries", label))))
}

/// Resolve a bearer token from the environment variable named in config.
pub fn api_key_from_env(var: Option<&str>, default_var: &str) -> Option<String> {
    let name = var.unwrap_or(default_var);
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
