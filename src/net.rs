//! HTTP helpers with backoff shared by the node-to-node clients.
//!
//! Only transport errors are retried. An HTTP error status is a reply and is
//! returned as-is for the caller to map.

use anyhow::Result;
use std::time::Duration;

const INITIAL_DELAY_MS: u64 = 150;
const MAX_DELAY_MS: u64 = 1200;
const JITTER_MS: u64 = 50;

async fn send_with_retry<F>(build: F, attempts: usize) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut delay_ms = INITIAL_DELAY_MS;
    let mut last_error = None;

    for attempt in 1..=attempts.max(1) {
        match build().send().await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                tracing::debug!("Request attempt {} failed: {}", attempt, e);
                last_error = Some(e);
                if attempt < attempts {
                    let jitter = rand::random::<u64>() % JITTER_MS;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
                }
            }
        }
    }

    match last_error {
        Some(e) => Err(anyhow::anyhow!(e)),
        None => Err(anyhow::anyhow!("Retry attempts exhausted")),
    }
}

pub async fn post_with_retry<T: serde::Serialize>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
    timeout: Duration,
    attempts: usize,
) -> Result<reqwest::Response> {
    send_with_retry(|| client.post(url).json(payload).timeout(timeout), attempts).await
}

pub async fn get_with_retry(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    attempts: usize,
) -> Result<reqwest::Response> {
    send_with_retry(|| client.get(url).timeout(timeout), attempts).await
}
