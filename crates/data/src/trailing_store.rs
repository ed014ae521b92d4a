//! Trailing stop state stores.
//!
//! [`MemoryTrailingStore`] is process-local. [`JsonFileTrailingStore`] keeps
//! the symbol → state map in a JSON file so ratchet values survive restarts.

use crate::json_file::{read_json, write_json_atomic};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use tradeloop_core::{PersistenceError, Symbol, TrailingState, TrailingStore};

#[derive(Debug, Default)]
pub struct MemoryTrailingStore {
    states: RwLock<BTreeMap<Symbol, TrailingState>>,
}

impl MemoryTrailingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrailingStore for MemoryTrailingStore {
    async fn get(&self, symbol: &Symbol) -> Result<Option<TrailingState>, PersistenceError> {
        Ok(self.states.read().await.get(symbol).copied())
    }

    async fn put(&self, symbol: &Symbol, state: TrailingState) -> Result<(), PersistenceError> {
        self.states.write().await.insert(symbol.clone(), state);
        Ok(())
    }

    async fn remove(&self, symbol: &Symbol) -> Result<(), PersistenceError> {
        self.states.write().await.remove(symbol);
        Ok(())
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, PersistenceError> {
        Ok(self.states.read().await.keys().cloned().collect())
    }
}

/// Write-through cache over a JSON file.
#[derive(Debug)]
pub struct JsonFileTrailingStore {
    path: PathBuf,
    states: Mutex<BTreeMap<Symbol, TrailingState>>,
}

impl JsonFileTrailingStore {
    /// Opens the store, loading existing state.
    ///
    /// A missing or corrupt file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let states = match read_json::<BTreeMap<Symbol, TrailingState>>(&path).await {
            Ok(Some(states)) => {
                info!(path = %path.display(), armed = states.len(), "Loaded trailing state");
                states
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load trailing state, starting fresh"
                );
                BTreeMap::new()
            }
        };
        Self {
            path,
            states: Mutex::new(states),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TrailingStore for JsonFileTrailingStore {
    async fn get(&self, symbol: &Symbol) -> Result<Option<TrailingState>, PersistenceError> {
        Ok(self.states.lock().await.get(symbol).copied())
    }

    async fn put(&self, symbol: &Symbol, state: TrailingState) -> Result<(), PersistenceError> {
        let mut states = self.states.lock().await;
        let mut next = states.clone();
        next.insert(symbol.clone(), state);
        write_json_atomic(&self.path, &next).await?;
        *states = next;
        Ok(())
    }

    async fn remove(&self, symbol: &Symbol) -> Result<(), PersistenceError> {
        let mut states = self.states.lock().await;
        if !states.contains_key(symbol) {
            return Ok(());
        }
        let mut next = states.clone();
        next.remove(symbol);
        write_json_atomic(&self.path, &next).await?;
        *states = next;
        Ok(())
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, PersistenceError> {
        Ok(self.states.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trailing_state.json");
        (dir, path)
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryTrailingStore::new();
        let btc = Symbol::from("BTC");
        assert_eq!(store.get(&btc).await.unwrap(), None);

        store.put(&btc, TrailingState::armed(dec!(0.02))).await.unwrap();
        assert_eq!(store.get(&btc).await.unwrap().unwrap().sl_pct, dec!(-0.02));
        assert_eq!(store.symbols().await.unwrap(), vec![btc.clone()]);

        store.remove(&btc).await.unwrap();
        assert!(store.symbols().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let (_dir, path) = temp_path();
        let eth = Symbol::from("ETH");
        {
            let store = JsonFileTrailingStore::open(&path).await;
            let mut state = TrailingState::armed(dec!(0.02));
            state.sl_pct = dec!(0.004);
            store.put(&eth, state).await.unwrap();
        }

        let reopened = JsonFileTrailingStore::open(&path).await;
        assert_eq!(reopened.get(&eth).await.unwrap().unwrap().sl_pct, dec!(0.004));
    }

    #[tokio::test]
    async fn test_file_store_remove_persists() {
        let (_dir, path) = temp_path();
        let sol = Symbol::from("SOL");
        let store = JsonFileTrailingStore::open(&path).await;
        store.put(&sol, TrailingState::armed(dec!(0.02))).await.unwrap();
        store.remove(&sol).await.unwrap();
        // Removing an unknown symbol is a no-op
        store.remove(&Symbol::from("DOGE")).await.unwrap();

        let reopened = JsonFileTrailingStore::open(&path).await;
        assert!(reopened.symbols().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let (_dir, path) = temp_path();
        std::fs::write(&path, "not json at all").unwrap();

        let store = JsonFileTrailingStore::open(&path).await;
        assert!(store.symbols().await.unwrap().is_empty());
    }
}
