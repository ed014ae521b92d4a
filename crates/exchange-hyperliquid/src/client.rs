use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tradeloop_core::{CallError, CallResult};

pub const MAINNET_URL: &str = "https://api.hyperliquid.xyz";
pub const TESTNET_URL: &str = "https://api.hyperliquid-testnet.xyz";

type DirectLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

/// Rate limited client for the Hyperliquid `/info` and `/exchange` endpoints.
#[derive(Clone)]
pub struct HyperliquidClient {
    http_client: Client,
    base_url: String,
    rate_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for HyperliquidClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HyperliquidClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        // 1200 requests per minute = 20 per second
        let quota = Quota::per_second(nonzero!(20u32));

        Ok(Self {
            http_client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Client for mainnet or testnet.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn for_network(testnet: bool, timeout: Duration) -> anyhow::Result<Self> {
        Self::new(if testnet { TESTNET_URL } else { MAINNET_URL }, timeout)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> CallResult<Value> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.http_client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CallError::status(status.as_u16(), text));
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// Read-only query against `/info`.
    pub async fn info(&self, body: &Value) -> CallResult<Value> {
        self.post("/info", body).await
    }

    /// Mid prices for every listed coin.
    pub async fn all_mids(&self) -> CallResult<Value> {
        self.info(&json!({ "type": "allMids" })).await
    }

    /// Perpetuals universe with size decimals, index order matches asset ids.
    pub async fn meta(&self) -> CallResult<Value> {
        self.info(&json!({ "type": "meta" })).await
    }

    /// Margin summary and open positions of `user`.
    pub async fn clearinghouse_state(&self, user: &str) -> CallResult<Value> {
        self.info(&json!({ "type": "clearinghouseState", "user": user })).await
    }
}
