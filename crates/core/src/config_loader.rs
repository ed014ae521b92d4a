use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Environment variables read without prefix, lower-cased onto `AppConfig` fields.
pub const ENV_KEYS: [&str; 20] = [
    "SYMBOLS",
    "MAX_POSITIONS",
    "ANALYSIS_INTERVAL_SECONDS",
    "FAST_TICK_SECONDS",
    "INITIAL_SL_PCT",
    "EXCHANGE",
    "HYPERLIQUID_TESTNET",
    "BYBIT_TESTNET",
    "TRAILING_MODE",
    "STRICT_POSITION_CAP",
    "ADOPT_UNTRACKED",
    "LEDGER_PATH",
    "LEDGER_CAPACITY",
    "TRAILING_STATE_PATH",
    "ORACLE_URL",
    "API_ADDR",
    "SIGNAL_INTERVAL",
    "SIGNAL_LIMIT",
    "CALL_TIMEOUT_SECONDS",
    "PAPER_EQUITY",
];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or if
    /// a value is out of range.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Loads configuration by merging built-in defaults, an optional TOML file,
    /// and environment variables, in increasing priority.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or if
    /// a value is out of range.
    pub fn load_from(path: &Path) -> Result<AppConfig> {
        let config: AppConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load configuration ({})", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::raw().only(&ENV_KEYS))
    }
}
