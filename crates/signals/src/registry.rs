//! Signal registry: fans one analysis request out to every provider.
//!
//! Providers run concurrently and each call goes through the retry harness.
//! A provider that still fails is recorded as `{ok: false, error}` in the
//! bundle; only providers marked required can cause the symbol to be skipped.

use crate::http::HttpSignalProvider;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tradeloop_core::{
    retry, AnalysisRequest, HealthStatus, RetryPolicy, SignalBundle, SignalEndpoint,
    SignalOutcome, SignalProvider, Symbol,
};

struct RegisteredProvider {
    provider: Arc<dyn SignalProvider>,
    required: bool,
}

/// Ordered set of signal providers.
pub struct SignalRegistry {
    providers: Vec<RegisteredProvider>,
    policy: RetryPolicy,
    interval: String,
    limit: u32,
}

impl std::fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("providers", &self.names())
            .field("interval", &self.interval)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl SignalRegistry {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            providers: Vec::new(),
            policy,
            interval: "15m".to_string(),
            limit: 200,
        }
    }

    /// Sets the candle interval and lookback sent with every request.
    #[must_use]
    pub fn with_request(mut self, interval: impl Into<String>, limit: u32) -> Self {
        self.interval = interval.into();
        self.limit = limit;
        self
    }

    /// Builds HTTP providers for every configured endpoint.
    ///
    /// # Errors
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_endpoints(
        endpoints: &[SignalEndpoint],
        policy: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let mut registry = Self::new(policy);
        for endpoint in endpoints {
            let provider = HttpSignalProvider::new(endpoint, policy.call_timeout)?;
            registry.register(Arc::new(provider), endpoint.required);
        }
        Ok(registry)
    }

    /// Registers a provider. A provider with the same name is replaced.
    pub fn register(&mut self, provider: Arc<dyn SignalProvider>, required: bool) {
        let name = provider.name().to_string();
        self.providers.retain(|p| p.provider.name() != name);
        self.providers.push(RegisteredProvider { provider, required });
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider.name()).collect()
    }

    #[must_use]
    pub fn required_names(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.required)
            .map(|p| p.provider.name())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn request_for(&self, symbol: &Symbol) -> AnalysisRequest {
        AnalysisRequest {
            symbol: symbol.clone(),
            interval: self.interval.clone(),
            limit: self.limit,
        }
    }

    /// Queries every provider for `symbol` concurrently.
    ///
    /// Never fails: exhausted providers appear as failed outcomes.
    pub async fn gather(&self, symbol: &Symbol) -> SignalBundle {
        let request = self.request_for(symbol);

        let calls = self.providers.iter().map(|entry| {
            let request = &request;
            async move {
                let provider = &entry.provider;
                let name = provider.name().to_string();
                let label = format!("{name}:{}", request.symbol);
                let outcome =
                    match retry(&self.policy, &label, move || provider.analyze(request)).await {
                        Ok(payload) => SignalOutcome::from_response(payload),
                        Err(e) => {
                            tracing::warn!(
                                signal = %name,
                                symbol = %request.symbol,
                                error = %e,
                                "Signal provider failed"
                            );
                            SignalOutcome::failed(e.error.to_string())
                        }
                    };
                (name, outcome)
            }
        });

        let outcomes: BTreeMap<String, SignalOutcome> = join_all(calls).await.into_iter().collect();
        SignalBundle::new(symbol.clone(), outcomes)
    }

    /// First required provider that is missing or not ok in `bundle`.
    #[must_use]
    pub fn missing_required<'a>(&'a self, bundle: &SignalBundle) -> Option<&'a str> {
        self.providers
            .iter()
            .filter(|p| p.required)
            .map(|p| p.provider.name())
            .find(|name| !bundle.is_ok(name))
    }

    /// Health of every provider, in registration order.
    pub async fn health(&self) -> Vec<(String, HealthStatus)> {
        let checks = self.providers.iter().map(|entry| async move {
            (entry.provider.name().to_string(), entry.provider.health().await)
        });
        join_all(checks).await
    }

    /// Shortens every call deadline, used by one-shot commands.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.policy = self.policy.with_call_timeout(timeout);
        self
    }
}
