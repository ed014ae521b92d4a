//! Bounded, append-only history of decisions.
//!
//! Every append loads the whole collection, pushes the new record, drops the
//! oldest entries beyond capacity and writes the collection back. Appends are
//! serialised by an internal lock; a store that cannot be read counts as an
//! empty history.

use crate::json_file::{read_json, write_json_atomic};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use tradeloop_core::{DecisionRecord, HealthStatus, LedgerStore, PersistenceError};

pub const DEFAULT_LEDGER_CAPACITY: usize = 500;

pub struct DecisionLedger {
    store: Arc<dyn LedgerStore>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for DecisionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionLedger")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl DecisionLedger {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Ledger backed by a JSON file at `path`.
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self::new(Arc::new(JsonFileLedgerStore::new(path)), capacity)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `record` and returns the resulting history length.
    ///
    /// # Errors
    /// Returns an error if the updated history cannot be written. The record
    /// is then not stored; earlier history is left intact.
    pub async fn append(&self, record: DecisionRecord) -> Result<usize, PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let mut history = self.load_or_empty().await;
        history.push(record);
        if history.len() > self.capacity {
            let excess = history.len() - self.capacity;
            history.drain(..excess);
        }

        self.store.save(&history).await?;
        debug!(len = history.len(), "Appended decision record");
        Ok(history.len())
    }

    /// Full history, oldest first.
    pub async fn history(&self) -> Vec<DecisionRecord> {
        self.load_or_empty().await
    }

    /// Up to `limit` records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        let mut history = self.load_or_empty().await;
        history.reverse();
        history.truncate(limit);
        history
    }

    pub async fn len(&self) -> usize {
        self.load_or_empty().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn health(&self) -> HealthStatus {
        match self.store.load().await {
            Ok(records) => HealthStatus::healthy()
                .with_detail("records", records.len())
                .with_detail("capacity", self.capacity),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    async fn load_or_empty(&self) -> Vec<DecisionRecord> {
        match self.store.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to load decision ledger, treating as empty");
                Vec::new()
            }
        }
    }
}

/// JSON array on disk, newest record last.
#[derive(Debug, Clone)]
pub struct JsonFileLedgerStore {
    path: PathBuf,
}

impl JsonFileLedgerStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonFileLedgerStore {
    async fn load(&self) -> Result<Vec<DecisionRecord>, PersistenceError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save(&self, records: &[DecisionRecord]) -> Result<(), PersistenceError> {
        write_json_atomic(&self.path, records).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    records: RwLock<Vec<DecisionRecord>>,
}

impl MemoryLedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<Vec<DecisionRecord>, PersistenceError> {
        Ok(self.records.read().await.clone())
    }

    async fn save(&self, records: &[DecisionRecord]) -> Result<(), PersistenceError> {
        *self.records.write().await = records.to_vec();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tradeloop_core::{
        DecisionContext, DecisionGateway, SignalBundle, SignalOutcome, Symbol,
    };

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("ai_decisions.json");
        (dir, path)
    }

    fn record(symbol: &str, reason: &str) -> DecisionRecord {
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "technical".to_string(),
            SignalOutcome::from_response(json!({"ok": true})),
        );
        let context = DecisionContext {
            symbol: Symbol::from(symbol),
            signals: SignalBundle::new(Symbol::from(symbol), outcomes),
            current_positions: vec![],
            equity: dec!(1000),
            max_positions: 3,
        };
        let decision =
            DecisionGateway::sanitize_value(&json!({"action": "HOLD", "reason": reason})).unwrap();
        DecisionRecord::new(context, decision)
    }

    // =========================================================================
    // Bounded append
    // =========================================================================

    #[tokio::test]
    async fn test_append_past_capacity_drops_oldest() {
        let ledger = DecisionLedger::new(Arc::new(MemoryLedgerStore::new()), 500);
        for i in 0..500 {
            ledger.append(record("BTC", &format!("#{i}"))).await.unwrap();
        }
        assert_eq!(ledger.len().await, 500);

        let len = ledger.append(record("ETH", "newest")).await.unwrap();
        assert_eq!(len, 500);

        let history = ledger.history().await;
        assert_eq!(history.len(), 500);
        assert_eq!(history[0].decision.reason(), "#1");
        assert_eq!(history[499].decision.reason(), "newest");
        assert_eq!(history[499].symbol.as_str(), "ETH");
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let ledger = DecisionLedger::new(Arc::new(MemoryLedgerStore::new()), 10);
        for i in 0..4 {
            ledger.append(record("SOL", &format!("#{i}"))).await.unwrap();
        }
        let recent = ledger.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].decision.reason(), "#3");
        assert_eq!(recent[1].decision.reason(), "#2");
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let ledger = Arc::new(DecisionLedger::new(Arc::new(MemoryLedgerStore::new()), 500));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger.append(record("BTC", &format!("#{i}"))).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(ledger.len().await, 16);
    }

    // =========================================================================
    // File store
    // =========================================================================

    #[tokio::test]
    async fn test_file_roundtrip() {
        let (_dir, path) = temp_path();
        let ledger = DecisionLedger::with_file(&path, 500);
        ledger.append(record("BTC", "first")).await.unwrap();

        let reopened = DecisionLedger::with_file(&path, 500);
        let history = reopened.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].decision.reason(), "first");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let (_dir, path) = temp_path();
        let ledger = DecisionLedger::with_file(&path, 500);
        assert!(ledger.is_empty().await);
        assert!(ledger.health().await.ok);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_history_and_recovers() {
        let (_dir, path) = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[{ truncated").unwrap();

        let ledger = DecisionLedger::with_file(&path, 500);
        assert!(ledger.history().await.is_empty());
        assert!(!ledger.health().await.ok);

        // Next append starts a fresh history
        assert_eq!(ledger.append(record("ADA", "after")).await.unwrap(), 1);
        assert!(ledger.health().await.ok);
    }
}
