//! Bybit v5 request signing.
//!
//! Every private request carries four headers. The signature is the hex
//! HMAC-SHA256 of `{timestamp}{api_key}{recv_window}{payload}`, where the
//! payload is the query string for GET and the raw JSON body for POST.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_ENV: &str = "BYBIT_API_KEY";
pub const API_SECRET_ENV: &str = "BYBIT_API_SECRET";
pub const DEFAULT_RECV_WINDOW: u64 = 5000;

pub const HEADER_API_KEY: &str = "X-BAPI-API-KEY";
pub const HEADER_TIMESTAMP: &str = "X-BAPI-TIMESTAMP";
pub const HEADER_RECV_WINDOW: &str = "X-BAPI-RECV-WINDOW";
pub const HEADER_SIGN: &str = "X-BAPI-SIGN";

/// API key pair. The secret never appears in `Debug` output.
pub struct BybitCredentials {
    api_key: String,
    api_secret: SecretString,
    recv_window: u64,
}

impl std::fmt::Debug for BybitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitCredentials")
            .field("api_key", &self.api_key)
            .field("recv_window", &self.recv_window)
            .finish_non_exhaustive()
    }
}

/// Headers for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub timestamp: String,
    pub recv_window: String,
    pub signature: String,
}

impl BybitCredentials {
    /// # Errors
    /// Returns an error if either value is empty.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.trim().is_empty() || api_secret.trim().is_empty() {
            anyhow::bail!("Bybit API key and secret must not be empty");
        }
        Ok(Self {
            api_key,
            api_secret: SecretString::from(api_secret),
            recv_window: DEFAULT_RECV_WINDOW,
        })
    }

    /// Loads `BYBIT_API_KEY` and `BYBIT_API_SECRET`.
    ///
    /// # Errors
    /// Returns an error if either variable is missing or empty.
    pub fn from_env() -> Result<Self> {
        let api_key =
            std::env::var(API_KEY_ENV).with_context(|| format!("Missing {API_KEY_ENV} env var"))?;
        let api_secret = std::env::var(API_SECRET_ENV)
            .with_context(|| format!("Missing {API_SECRET_ENV} env var"))?;
        Self::new(api_key, api_secret)
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Signs `payload` at `timestamp_ms`.
    ///
    /// # Errors
    /// Returns an error if the HMAC key is rejected.
    pub fn sign(&self, timestamp_ms: i64, payload: &str) -> Result<SignedHeaders> {
        let timestamp = timestamp_ms.to_string();
        let recv_window = self.recv_window.to_string();
        let message = format!("{timestamp}{}{recv_window}{payload}", self.api_key);

        let mut mac = HmacSha256::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid HMAC key length: {e}"))?;
        mac.update(message.as_bytes());

        Ok(SignedHeaders {
            api_key: self.api_key.clone(),
            timestamp,
            recv_window,
            signature: hex::encode(mac.finalize().into_bytes()),
        })
    }
}
