use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

pub const ADDRESS_ENV: &str = "HYPERLIQUID_ADDRESS";
pub const PRIVATE_KEY_ENV: &str = "HYPERLIQUID_PRIVATE_KEY";

/// Create wallet from private key (with or without 0x)
///
/// # Errors
/// Returns error if private key format is invalid
pub fn create_wallet_from_private_key(private_key: &str) -> Result<LocalWallet> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);

    LocalWallet::from_str(key).context("Failed to create wallet from private key")
}

/// Account address and signing key for live trading.
pub struct WalletConfig {
    /// Master account address (42-character hex with 0x prefix)
    pub account_address: String,
    private_key: SecretString,
    nonce_counter: AtomicU64,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("account_address", &self.account_address)
            .finish_non_exhaustive()
    }
}

impl WalletConfig {
    /// Validates and wraps credentials.
    ///
    /// # Errors
    /// Returns error if the address or key has the wrong format
    pub fn new(account_address: impl Into<String>, private_key: impl Into<String>) -> Result<Self> {
        let account_address = account_address.into();
        let private_key = private_key.into();

        if !account_address.starts_with("0x") || account_address.len() != 42 {
            anyhow::bail!("Invalid account address format: must be 0x-prefixed 42-char hex");
        }

        let bare_key = private_key.strip_prefix("0x").unwrap_or(&private_key);
        if bare_key.len() != 64 || !bare_key.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Invalid private key format: must be 64 hex chars, optionally 0x-prefixed");
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let nonce = u64::try_from(timestamp).context("Timestamp must be positive")?;

        Ok(Self {
            account_address,
            private_key: SecretString::from(private_key),
            nonce_counter: AtomicU64::new(nonce),
        })
    }

    /// Load wallet from environment variables
    ///
    /// Expected env vars:
    /// - `HYPERLIQUID_ADDRESS`: Master account address
    /// - `HYPERLIQUID_PRIVATE_KEY`: signing key (64 hex chars, with or without 0x)
    ///
    /// # Errors
    /// Returns error if environment variables are missing or invalid format
    pub fn from_env() -> Result<Self> {
        let account_address =
            std::env::var(ADDRESS_ENV).with_context(|| format!("Missing {ADDRESS_ENV} env var"))?;
        let private_key = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("Missing {PRIVATE_KEY_ENV} env var"))?;

        Self::new(account_address, private_key)
    }

    /// # Errors
    /// Returns error if the key cannot be parsed
    pub fn wallet(&self) -> Result<LocalWallet> {
        create_wallet_from_private_key(self.private_key.expose_secret())
    }

    /// Get next nonce (atomic increment)
    #[must_use]
    pub fn next_nonce(&self) -> u64 {
        self.nonce_counter.fetch_add(1, Ordering::SeqCst)
    }
}
