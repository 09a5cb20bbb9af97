//! Per-symbol alert cooldown

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::store::PersistentStore;

/// Store key of the alert record document
pub const ALERT_RECORDS_STORAGE_KEY: &str = "alert_records";

/// Default cooldown between alerts for one symbol
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub token_symbol: String,
    pub last_alerted_at: DateTime<Utc>,
}

/// Last alert time per symbol
///
/// Records older than the cooldown behave as if absent.
pub struct AlertRecords {
    records: DashMap<String, AlertRecord>,
    cooldown: Duration,
    store: Arc<dyn PersistentStore>,
    flushes: TaskTracker,
}

impl AlertRecords {
    pub fn new(cooldown: Duration, store: Arc<dyn PersistentStore>, flushes: TaskTracker) -> Self {
        Self {
            records: DashMap::new(),
            cooldown,
            store,
            flushes,
        }
    }

    pub async fn load(cooldown: Duration, store: Arc<dyn PersistentStore>, flushes: TaskTracker) -> Self {
        let records = Self::new(cooldown, store, flushes);

        match records.store.load(ALERT_RECORDS_STORAGE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<AlertRecord>>(value) {
                Ok(list) => {
                    let now = Utc::now();
                    for record in list {
                        if now - record.last_alerted_at < cooldown {
                            records.records.insert(record.token_symbol.clone(), record);
                        }
                    }
                    info!(active = records.records.len(), "Loaded alert records");
                }
                Err(e) => warn!(error = %e, "Corrupt alert records, starting empty"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read alert records, starting empty"),
        }

        records
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left on the symbol's cooldown, if any
    pub fn remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        let key = normalize(symbol);
        self.records.get(&key).and_then(|r| {
            let elapsed = now - r.last_alerted_at;
            (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
        })
    }

    pub fn is_cooling_down(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.remaining(symbol, now).is_some()
    }

    /// Record an alert and persist
    pub async fn record(&self, symbol: &str, now: DateTime<Utc>) {
        let key = normalize(symbol);
        self.records.insert(
            key.clone(),
            AlertRecord {
                token_symbol: key,
                last_alerted_at: now,
            },
        );
        self.persist().await;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn persist(&self) {
        let list: Vec<AlertRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        let value = match serde_json::to_value(&list) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to serialize alert records");
                return;
            }
        };

        let store = self.store.clone();
        let handle = self.flushes.spawn(async move {
            if let Err(e) = store.save(ALERT_RECORDS_STORAGE_KEY, &value).await {
                warn!(error = %e, "Failed to persist alert records");
            }
        });
        if let Err(e) = handle.await {
            warn!(error = %e, "Alert record flush task failed");
        }
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
