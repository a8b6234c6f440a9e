use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Raw response handed back to the retry layer.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Server-requested wait before the next attempt (429 responses).
    pub retry_after: Option<Duration>,
    pub rate_limit_remaining: Option<u32>,
    pub rate_limit_limit: Option<u32>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The seam between retry/limiter logic and the network.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport for the PUBG JSON:API.
pub struct ReqwestTransport {
    http: Client,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(api_key: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ReqwestTransport {
            http,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ApiTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<ApiResponse, TransportError> {
        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, "application/vnd.api+json")
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read body: {}", e)))?;

        Ok(ApiResponse {
            status,
            body,
            retry_after: retry_after(&headers, Utc::now().timestamp()),
            rate_limit_remaining: header_u32(&headers, "x-ratelimit-remaining"),
            rate_limit_limit: header_u32(&headers, "x-ratelimit-limit"),
        })
    }
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// `Retry-After` seconds, else time until the `X-RateLimit-Reset` epoch.
fn retry_after(headers: &HeaderMap, now_epoch: i64) -> Option<Duration> {
    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }
    let reset: i64 = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let wait = reset - now_epoch;
    (wait > 0).then(|| Duration::from_secs(wait as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_header_wins() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        h.insert("x-ratelimit-reset", HeaderValue::from_static("5000"));
        assert_eq!(retry_after(&h, 1000), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_retry_after_from_reset_epoch() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-reset", HeaderValue::from_static("1030"));
        assert_eq!(retry_after(&h, 1000), Some(Duration::from_secs(30)));
        assert_eq!(retry_after(&h, 2000), None);
        assert_eq!(retry_after(&HeaderMap::new(), 1000), None);
    }

    #[test]
    fn test_header_u32() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static(" 7 "));
        assert_eq!(header_u32(&h, "x-ratelimit-remaining"), Some(7));
        assert_eq!(header_u32(&h, "x-ratelimit-limit"), None);
    }
}
