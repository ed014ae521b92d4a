pub mod adapter;
pub mod client;
pub mod paper;
pub mod signing;
pub mod wallet;

pub use adapter::HyperliquidAdapter;
pub use client::HyperliquidClient;
pub use paper::PaperExecutionAdapter;
pub use wallet::WalletConfig;
