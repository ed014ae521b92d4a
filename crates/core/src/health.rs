use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Liveness report every component can produce.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl HealthStatus {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            details: Map::new(),
        }
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}
