//! Bybit v5 integration: HMAC request signing, a rate limited REST client
//! and the [`BybitAdapter`] execution adapter.

pub mod adapter;
pub mod auth;
pub mod client;

pub use adapter::BybitAdapter;
pub use auth::BybitCredentials;
pub use client::BybitClient;
