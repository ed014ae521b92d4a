//! HTTP signal provider.
//!
//! Each analysis service exposes one POST route taking
//! `{symbol, interval, limit}` and answering with a JSON object, plus a
//! `GET /health` route.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tradeloop_core::{AnalysisRequest, CallError, CallResult, HealthStatus, SignalEndpoint, SignalProvider};

/// Sends `request` as JSON to `url` and decodes the body.
///
/// Any non-success status becomes [`CallError::Status`], an unreadable body
/// becomes [`CallError::Decode`].
pub(crate) async fn post_json<B: serde::Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
) -> CallResult<Value> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(CallError::status(status.as_u16(), text));
    }

    Ok(serde_json::from_str(&text)?)
}

/// Checks `GET {base_url}/health`.
pub(crate) async fn check_health(client: &Client, base_url: &str) -> HealthStatus {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            HealthStatus::healthy().with_detail("url", base_url)
        }
        Ok(response) => HealthStatus::unhealthy(format!("status {}", response.status().as_u16()))
            .with_detail("url", base_url),
        Err(e) => HealthStatus::unhealthy(CallError::from(e).to_string()).with_detail("url", base_url),
    }
}

pub(crate) fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Signal provider backed by an HTTP analysis service.
#[derive(Clone)]
pub struct HttpSignalProvider {
    name: String,
    base_url: String,
    path: String,
    client: Client,
}

impl std::fmt::Debug for HttpSignalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSignalProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl HttpSignalProvider {
    /// Creates a provider for `endpoint`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &SignalEndpoint, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            name: endpoint.name.clone(),
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            path: normalize_path(&endpoint.path),
            client: build_client(timeout)?,
        })
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[async_trait]
impl SignalProvider for HttpSignalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, request: &AnalysisRequest) -> CallResult<Value> {
        let payload = post_json(&self.client, &self.url(), request).await?;
        tracing::debug!(provider = %self.name, symbol = %request.symbol, "Signal received");
        Ok(payload)
    }

    async fn health(&self) -> HealthStatus {
        check_health(&self.client, &self.base_url)
            .await
            .with_detail("provider", self.name.as_str())
    }
}
