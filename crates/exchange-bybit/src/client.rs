//! Bybit v5 REST client with rate limiting.
//!
//! Responses use the `{retCode, retMsg, result}` envelope. A non-zero
//! `retCode` is a venue rejection, not a transport fault, so it is reported
//! as [`CallError::Rejected`] and never retried.

use crate::auth::{
    BybitCredentials, HEADER_API_KEY, HEADER_RECV_WINDOW, HEADER_SIGN, HEADER_TIMESTAMP,
};
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tradeloop_core::{CallError, CallResult};

pub const BYBIT_MAINNET_URL: &str = "https://api.bybit.com";
pub const BYBIT_TESTNET_URL: &str = "https://api-testnet.bybit.com";

type DirectLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct BybitClient {
    http_client: Client,
    base_url: String,
    credentials: Arc<BybitCredentials>,
    rate_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for BybitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Builds `k=v&k=v` in the given order. The same string is sent and signed.
#[must_use]
pub fn query_string(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Unwraps the v5 envelope.
pub(crate) fn into_result(body: Value) -> CallResult<Value> {
    let code = body
        .get("retCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| CallError::Decode("missing retCode".to_string()))?;
    if code != 0 {
        let message = body.get("retMsg").and_then(Value::as_str).unwrap_or("unknown");
        return Err(CallError::rejected(format!("retCode {code}: {message}")));
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

impl BybitClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: BybitCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Arc::new(credentials),
            // Bybit allows 10 requests per second per UID on most private routes
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(10u32)))),
        })
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn for_network(
        testnet: bool,
        credentials: BybitCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let url = if testnet { BYBIT_TESTNET_URL } else { BYBIT_MAINNET_URL };
        Self::new(url, credentials, timeout)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn signed(&self, builder: RequestBuilder, payload: &str) -> CallResult<RequestBuilder> {
        let headers = self
            .credentials
            .sign(chrono::Utc::now().timestamp_millis(), payload)
            .map_err(|e| CallError::config(e.to_string()))?;
        Ok(builder
            .header(HEADER_API_KEY, headers.api_key)
            .header(HEADER_TIMESTAMP, headers.timestamp)
            .header(HEADER_RECV_WINDOW, headers.recv_window)
            .header(HEADER_SIGN, headers.signature))
    }

    async fn send(&self, builder: RequestBuilder) -> CallResult<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CallError::status(status.as_u16(), text));
        }
        into_result(serde_json::from_str(&text)?)
    }

    /// Signed GET.
    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> CallResult<Value> {
        self.rate_limiter.until_ready().await;
        let query = query_string(params);
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };
        let builder = self.signed(self.http_client.get(&url), &query)?;
        self.send(builder).await
    }

    /// Signed POST with a JSON body.
    pub async fn post(&self, path: &str, body: &Value) -> CallResult<Value> {
        self.rate_limiter.until_ready().await;
        let payload = serde_json::to_string(body)?;
        let url = format!("{}{path}", self.base_url);
        let builder = self.signed(
            self.http_client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone()),
            &payload,
        )?;
        self.send(builder).await
    }
}
