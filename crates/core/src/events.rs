//! Bounded, thread-safe logs for operator-facing events.
//!
//! [`BoundedLog`] keeps the most recent `capacity` items and drops the oldest.
//! [`EventLog`] builds on it for management events and also fans each event
//! out to broadcast subscribers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 100;
pub const DEFAULT_EQUITY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CycleStarted,
    CycleFinished,
    Decision,
    PositionOpened,
    PositionClosed,
    StopMoved,
    StopHit,
    Skipped,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub level: EventLevel,
    /// Symbol or component the event is about.
    pub subject: String,
    pub message: String,
}

/// Fixed-capacity FIFO.
#[derive(Debug)]
pub struct BoundedLog<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Up to `limit` items, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.items.lock().iter().rev().take(limit).cloned().collect()
    }

    /// All items, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Management event log shared by the scheduler, risk gate and trailing engine.
#[derive(Debug)]
pub struct EventLog {
    log: BoundedLog<ManagementEvent>,
    tx: broadcast::Sender<ManagementEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            log: BoundedLog::new(capacity),
            tx,
        }
    }

    pub fn record(
        &self,
        kind: EventKind,
        level: EventLevel,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) {
        let event = ManagementEvent {
            at: Utc::now(),
            kind,
            level,
            subject: subject.into(),
            message: message.into(),
        };
        self.log.push(event.clone());
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ManagementEvent> {
        self.log.recent(limit)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagementEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

/// One point of the equity history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub at: DateTime<Utc>,
    pub equity: rust_decimal::Decimal,
}
