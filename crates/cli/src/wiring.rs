//! Builds the engine and its collaborators from [`AppConfig`].

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tradeloop_bybit::{BybitAdapter, BybitClient, BybitCredentials};
use tradeloop_core::{decimal_from_f64, AppConfig, EventLog, ExchangeKind, ExecutionAdapter};
use tradeloop_data::{DecisionLedger, JsonFileTrailingStore};
use tradeloop_hyperliquid::{
    HyperliquidAdapter, HyperliquidClient, PaperExecutionAdapter, WalletConfig,
};
use tradeloop_orchestrator::{Engine, EngineComponents, EngineSettings};
use tradeloop_signals::{HttpDecisionProvider, SignalRegistry};

/// Hyperliquid taker fee, 0.035%.
const PAPER_COMMISSION_RATE: Decimal = Decimal::from_parts(35, 0, 0, false, 5);
const PAPER_SLIPPAGE_BPS: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Builds the execution adapter for the configured exchange.
///
/// # Errors
/// Returns an error if credentials for a live exchange are missing or invalid,
/// or if an HTTP client cannot be built.
pub fn build_adapter(config: &AppConfig, timeout: Duration) -> Result<Arc<dyn ExecutionAdapter>> {
    match config.exchange {
        ExchangeKind::Paper => {
            let equity = decimal_from_f64(config.paper_equity).context("Invalid paper_equity")?;
            let feed = HyperliquidClient::for_network(config.hyperliquid_testnet, timeout)?;
            tracing::info!(equity = %equity, "Using paper venue with Hyperliquid price feed");
            Ok(Arc::new(
                PaperExecutionAdapter::new(equity, PAPER_COMMISSION_RATE, PAPER_SLIPPAGE_BPS)
                    .with_price_feed(feed),
            ))
        }
        ExchangeKind::Hyperliquid => {
            let wallet =
                WalletConfig::from_env().context("Hyperliquid credentials are required")?;
            let client = HyperliquidClient::for_network(config.hyperliquid_testnet, timeout)?;
            tracing::info!(
                base_url = client.base_url(),
                account = %wallet.account_address,
                "Using Hyperliquid venue"
            );
            Ok(Arc::new(HyperliquidAdapter::new(client, wallet)?))
        }
        ExchangeKind::Bybit => {
            let credentials =
                BybitCredentials::from_env().context("Bybit credentials are required")?;
            let client = BybitClient::for_network(config.bybit_testnet, credentials, timeout)?;
            tracing::info!(base_url = client.base_url(), "Using Bybit venue");
            Ok(Arc::new(BybitAdapter::new(client)))
        }
    }
}

/// Wires every component into an [`Engine`].
///
/// # Errors
/// Returns an error if the adapter or an HTTP client cannot be built.
pub async fn build_engine(config: &AppConfig) -> Result<Arc<Engine>> {
    let settings = EngineSettings::from_config(config)?;
    let timeout = settings.retry.call_timeout;

    let adapter = build_adapter(config, timeout)?;
    let signals = SignalRegistry::from_endpoints(&config.signals, settings.retry)
        .context("Failed to build signal providers")?
        .with_request(config.signal_interval.clone(), config.signal_limit);
    let oracle = HttpDecisionProvider::new(&config.oracle_url, timeout)
        .context("Failed to build decision provider")?;
    let ledger = DecisionLedger::with_file(&config.ledger_path, config.ledger_capacity);
    let trailing_store = JsonFileTrailingStore::open(&config.trailing_state_path).await;

    tracing::info!(
        venue = adapter.venue(),
        symbols = config.symbols.len(),
        signals = ?signals.names(),
        ledger = %config.ledger_path.display(),
        "Engine wired"
    );

    Ok(Arc::new(Engine::new(
        EngineComponents {
            adapter,
            signals,
            oracle: Arc::new(oracle),
            ledger: Arc::new(ledger),
            trailing_store: Arc::new(trailing_store),
            events: Arc::new(EventLog::default()),
        },
        settings,
    )))
}
