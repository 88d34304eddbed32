use std::time::Duration;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use super::error::ThorClientError;
use super::retry::{run_with_retry, seed_for};
use crate::config::RetryPolicy;

/// GET-only HTTP client with bounded exponential backoff.
///
/// Every request races `cancel_token`, so shutdown never waits on a stuck THORNode.
pub struct RetryableHttpClient {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    cancel_token: CancellationToken,
}

impl RetryableHttpClient {
    pub fn new(
        request_timeout: Duration,
        retry_policy: RetryPolicy,
        cancel_token: CancellationToken,
    ) -> Result<Self, ThorClientError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ThorClientError::Builder)?;
        Ok(Self {
            client,
            retry_policy,
            cancel_token,
        })
    }

    /// Returns the full body of a `200 OK` response.
    pub async fn get(&self, url: &str) -> Result<Vec<u8>, ThorClientError> {
        let attempts = run_with_retry(
            &self.retry_policy,
            seed_for(url),
            |attempt| self.get_once(url, attempt),
            ThorClientError::is_retryable,
        );

        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(ThorClientError::Cancelled),
            outcome = attempts => match outcome {
                Ok((body, _)) => Ok(body),
                Err(terminal) => {
                    if terminal.exhausted_retryable {
                        tracing::warn!(
                            event = "thornode_request_retries_exhausted",
                            url = %url,
                            attempts = terminal.attempts,
                            error = %terminal.error,
                            "giving up on THORNode request"
                        );
                    }
                    Err(terminal.error)
                }
            },
        }
    }

    async fn get_once(&self, url: &str, attempt: u32) -> Result<Vec<u8>, ThorClientError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| request_err(url, source))?;

        let status = response.status();
        if status != StatusCode::OK {
            // Drain so the connection goes back to the pool.
            let _ = response.bytes().await;
            tracing::debug!(
                event = "thornode_unexpected_status",
                url = %url,
                status = status.as_u16(),
                attempt,
                "THORNode returned non-200 status"
            );
            return Err(ThorClientError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| request_err(url, source))?;
        Ok(body.to_vec())
    }
}

fn request_err(url: &str, source: reqwest::Error) -> ThorClientError {
    ThorClientError::Request {
        url: url.to_string(),
        source,
    }
}
