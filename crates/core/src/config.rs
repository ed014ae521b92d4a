use crate::types::Symbol;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SYMBOLS: [&str; 8] = ["BTC", "ETH", "SOL", "DOGE", "SUI", "ADA", "AAVE", "AVAX"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "symbols_from_list_or_csv")]
    pub symbols: Vec<Symbol>,
    pub max_positions: usize,
    pub analysis_interval_seconds: u64,
    pub fast_tick_seconds: u64,
    /// Initial stop distance as a fraction of entry (0.02 = 2%).
    pub initial_sl_pct: f64,
    pub exchange: ExchangeKind,
    pub hyperliquid_testnet: bool,
    pub bybit_testnet: bool,
    pub trailing_mode: TrailingMode,
    /// Count opens executed earlier in the same cycle against `max_positions`.
    pub strict_position_cap: bool,
    /// Arm trailing stops for venue positions the engine did not open.
    pub adopt_untracked: bool,
    pub ledger_path: PathBuf,
    pub ledger_capacity: usize,
    pub trailing_state_path: PathBuf,
    pub oracle_url: String,
    pub api_addr: String,
    pub signal_interval: String,
    pub signal_limit: u32,
    pub call_timeout_seconds: u64,
    /// Starting balance of the paper venue.
    pub paper_equity: f64,
    pub signals: Vec<SignalEndpoint>,
}

/// One HTTP signal service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default = "default_signal_path")]
    pub path: String,
    /// A failed required provider skips the symbol for the cycle.
    #[serde(default)]
    pub required: bool,
}

fn default_signal_path() -> String {
    "/analyze".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Hyperliquid,
    Bybit,
    Paper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingMode {
    /// Tick once at the end of every decision cycle.
    Pull,
    /// Tick on an independent fast timer.
    Push,
    Both,
}

impl TrailingMode {
    #[must_use]
    pub const fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::Both)
    }

    #[must_use]
    pub const fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::Both)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| Symbol::from(*s)).collect(),
            max_positions: 3,
            analysis_interval_seconds: 15 * 60,
            fast_tick_seconds: 30,
            initial_sl_pct: 0.02,
            exchange: ExchangeKind::Hyperliquid,
            hyperliquid_testnet: true,
            bybit_testnet: true,
            trailing_mode: TrailingMode::Both,
            strict_position_cap: false,
            adopt_untracked: true,
            ledger_path: PathBuf::from("data/ai_decisions.json"),
            ledger_capacity: 500,
            trailing_state_path: PathBuf::from("data/trailing_state.json"),
            oracle_url: "http://master_ai_agent:8000".to_string(),
            api_addr: "0.0.0.0:8080".to_string(),
            signal_interval: "15m".to_string(),
            signal_limit: 200,
            call_timeout_seconds: 40,
            paper_equity: 1000.0,
            signals: default_signals(),
        }
    }
}

fn default_signals() -> Vec<SignalEndpoint> {
    let endpoint = |name: &str, host: &str, path: &str, required: bool| SignalEndpoint {
        name: name.to_string(),
        url: format!("http://{host}:8000"),
        path: path.to_string(),
        required,
    };
    vec![
        endpoint("technical", "technical_analyzer", "/analyze", true),
        endpoint("fibonacci", "fibonacci_agent", "/analyze", false),
        endpoint("gann", "gann_agent", "/analyze", false),
        endpoint("sentiment", "sentiment_agent", "/analyze", false),
        endpoint("forecast", "forecaster_agent", "/forecast", false),
    ]
}

impl AppConfig {
    /// Checks ranges that the type system does not.
    ///
    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("symbols must not be empty");
        }
        if self.max_positions == 0 {
            anyhow::bail!("max_positions must be at least 1");
        }
        if self.analysis_interval_seconds == 0 || self.fast_tick_seconds == 0 {
            anyhow::bail!("analysis and fast tick intervals must be positive");
        }
        if !(self.initial_sl_pct > 0.0 && self.initial_sl_pct < 1.0) {
            anyhow::bail!(
                "initial_sl_pct must be in (0, 1), got {}",
                self.initial_sl_pct
            );
        }
        if self.ledger_capacity == 0 {
            anyhow::bail!("ledger_capacity must be at least 1");
        }
        if self.call_timeout_seconds == 0 {
            anyhow::bail!("call_timeout_seconds must be positive");
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

/// Accepts `["BTC", "ETH"]` as well as `"BTC,ETH"` (the environment form).
fn symbols_from_list_or_csv<'de, D>(deserializer: D) -> Result<Vec<Symbol>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(items) => items,
        ListOrCsv::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .map(Symbol::from)
        .collect())
}
