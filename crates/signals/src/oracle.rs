//! Client for the HTTP decision service.
//!
//! The service answers `POST /decide` with `{ok, decision}`. `decision` is
//! usually an object but some models return it as a JSON string; both are
//! passed on as raw text and parsed by the decision gateway.

use crate::http::{build_client, post_json, check_health};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tradeloop_core::{CallError, CallResult, DecisionContext, DecisionProvider, HealthStatus};

#[derive(Clone)]
pub struct HttpDecisionProvider {
    base_url: String,
    client: Client,
}

impl std::fmt::Debug for HttpDecisionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDecisionProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpDecisionProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }

    fn decide_url(&self) -> String {
        format!("{}/decide", self.base_url)
    }
}

/// Pulls the raw decision text out of a `/decide` response.
fn extract_decision(body: &Value) -> CallResult<String> {
    if body.get("ok").and_then(Value::as_bool) == Some(false) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("decision service reported failure");
        return Err(CallError::rejected(error));
    }

    match body.get("decision") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) | None => Err(CallError::Decode(
            "response has no decision field".to_string(),
        )),
        Some(other) => Ok(other.to_string()),
    }
}

#[async_trait]
impl DecisionProvider for HttpDecisionProvider {
    async fn decide(&self, context: &DecisionContext) -> CallResult<String> {
        let body = post_json(&self.client, &self.decide_url(), &context.to_wire()).await?;
        extract_decision(&body)
    }

    async fn health(&self) -> HealthStatus {
        check_health(&self.client, &self.base_url).await
    }
}
