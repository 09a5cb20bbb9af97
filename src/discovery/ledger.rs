//! Appearance ledger
//!
//! Tracks, per strategy, every token the strategy has seen and how many
//! scans in a row it has kept showing up. The whole ledger is one document
//! in the persistent store, read on load and rewritten after every
//! mutating call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::store::PersistentStore;
use crate::types::TokenSnapshot;

/// Default gap below which sightings count as consecutive
pub const DEFAULT_CONSECUTIVE_WINDOW_HOURS: i64 = 8;

/// Default number of sighting timestamps kept per token
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Default age after which untouched records are pruned
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

/// Appearance history of one token within one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceRecord {
    pub token_address: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub consecutive_appearances: u32,
    /// Lifetime sightings, never reset
    pub total_appearances: u32,
    /// Most recent sightings, oldest first
    pub appearance_timestamps: Vec<DateTime<Utc>>,
    /// Liquidity when the strategy first saw the token
    pub initial_liquidity_usd: f64,
    pub last_observed_payload: TokenSnapshot,
}

impl AppearanceRecord {
    fn first_sighting(address: &str, payload: TokenSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            token_address: address.to_string(),
            first_seen_at: now,
            last_seen_at: now,
            consecutive_appearances: 1,
            total_appearances: 1,
            appearance_timestamps: vec![now],
            initial_liquidity_usd: payload.liquidity_usd,
            last_observed_payload: payload,
        }
    }

    /// Liquidity change since first observation, percent (negative = decline)
    pub fn liquidity_change_pct(&self) -> Option<f64> {
        if self.initial_liquidity_usd <= 0.0 {
            return None;
        }
        let current = self.last_observed_payload.liquidity_usd;
        Some((current - self.initial_liquidity_usd) / self.initial_liquidity_usd * 100.0)
    }
}

/// Tunables shared by all records of a ledger
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub min_consecutive_appearances: u32,
    pub consecutive_window: Duration,
    pub max_history: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            min_consecutive_appearances: 1,
            consecutive_window: Duration::hours(DEFAULT_CONSECUTIVE_WINDOW_HOURS),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// On-disk shape of a ledger
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    strategy: String,
    #[serde(default)]
    last_execution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    records: HashMap<String, AppearanceRecord>,
}

/// Per-strategy appearance ledger (sole mutator of its records)
pub struct AppearanceLedger {
    strategy: String,
    settings: LedgerSettings,
    records: HashMap<String, AppearanceRecord>,
    last_execution_time: Option<DateTime<Utc>>,
    store: Arc<dyn PersistentStore>,
    flushes: TaskTracker,
}

impl AppearanceLedger {
    /// Store key for a strategy's ledger
    pub fn storage_key(strategy: &str) -> String {
        format!("appearances/{}", strategy)
    }

    /// Create an empty ledger without touching storage
    pub fn empty(
        strategy: &str,
        settings: LedgerSettings,
        store: Arc<dyn PersistentStore>,
        flushes: TaskTracker,
    ) -> Self {
        Self {
            strategy: strategy.to_string(),
            settings,
            records: HashMap::new(),
            last_execution_time: None,
            store,
            flushes,
        }
    }

    /// Load a ledger; missing or corrupt storage yields an empty ledger
    pub async fn load(
        strategy: &str,
        settings: LedgerSettings,
        store: Arc<dyn PersistentStore>,
        flushes: TaskTracker,
    ) -> Self {
        let mut ledger = Self::empty(strategy, settings, store, flushes);
        let key = Self::storage_key(strategy);

        match ledger.store.load(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<LedgerDocument>(value) {
                Ok(document) => {
                    ledger.records = document.records;
                    ledger.last_execution_time = document.last_execution_time;
                    info!(
                        strategy = %strategy,
                        records = ledger.records.len(),
                        "Loaded appearance ledger"
                    );
                }
                Err(e) => {
                    warn!(strategy = %strategy, error = %e, "Corrupt appearance ledger, starting empty");
                }
            },
            Ok(None) => debug!(strategy = %strategy, "No stored appearance ledger"),
            Err(e) => {
                warn!(strategy = %strategy, error = %e, "Failed to read appearance ledger, starting empty");
            }
        }

        ledger
    }

    /// Apply one sighting in memory
    fn observe(&mut self, address: &str, payload: TokenSnapshot, now: DateTime<Utc>) -> AppearanceRecord {
        let window = self.settings.consecutive_window;
        let max_history = self.settings.max_history.max(1);

        let record = self
            .records
            .entry(address.to_string())
            .and_modify(|record| {
                let gap = now - record.last_seen_at;
                if gap < window {
                    record.consecutive_appearances += 1;
                } else {
                    record.consecutive_appearances = 1;
                }
                record.total_appearances += 1;
                record.last_seen_at = now;
                record.appearance_timestamps.push(now);
                if record.appearance_timestamps.len() > max_history {
                    let excess = record.appearance_timestamps.len() - max_history;
                    record.appearance_timestamps.drain(..excess);
                }
                record.last_observed_payload = payload.clone();
            })
            .or_insert_with(|| AppearanceRecord::first_sighting(address, payload, now));

        record.clone()
    }

    /// Record one sighting and persist
    pub async fn record(
        &mut self,
        address: &str,
        payload: TokenSnapshot,
        now: DateTime<Utc>,
    ) -> AppearanceRecord {
        let record = self.observe(address, payload, now);
        self.persist().await;
        record
    }

    /// Record a whole scan's sightings with a single persist
    ///
    /// Duplicate addresses within one batch count once.
    pub async fn record_batch(
        &mut self,
        snapshots: &[TokenSnapshot],
        now: DateTime<Utc>,
    ) -> HashMap<String, AppearanceRecord> {
        let mut recorded = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            if recorded.contains_key(&snapshot.address) {
                continue;
            }
            let record = self.observe(&snapshot.address, snapshot.clone(), now);
            recorded.insert(snapshot.address.clone(), record);
        }
        self.persist().await;
        recorded
    }

    /// Tokens meeting the strategy's minimum consecutive appearances
    pub fn promising_tokens(&self) -> HashSet<String> {
        self.records
            .values()
            .filter(|r| r.consecutive_appearances >= self.settings.min_consecutive_appearances)
            .map(|r| r.token_address.clone())
            .collect()
    }

    /// Whether a record counts as promising
    pub fn is_promising(&self, record: &AppearanceRecord) -> bool {
        record.consecutive_appearances >= self.settings.min_consecutive_appearances
    }

    /// Remove records not seen for `max_age_days` (in memory only)
    pub fn prune_stale(&mut self, max_age_days: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(max_age_days);
        let before = self.records.len();
        self.records.retain(|_, r| r.last_seen_at >= cutoff);
        let removed = before - self.records.len();

        if removed > 0 {
            debug!(strategy = %self.strategy, removed, "Pruned stale appearance records");
        }
        removed
    }

    /// Remove records not seen for `max_age_days`, then persist
    pub async fn prune(&mut self, max_age_days: i64, now: DateTime<Utc>) -> usize {
        let removed = self.prune_stale(max_age_days, now);
        self.persist().await;
        removed
    }

    pub fn get(&self, address: &str) -> Option<&AppearanceRecord> {
        self.records.get(address)
    }

    pub fn records(&self) -> impl Iterator<Item = &AppearanceRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_execution_time(&self) -> Option<DateTime<Utc>> {
        self.last_execution_time
    }

    pub fn set_last_execution_time(&mut self, at: DateTime<Utc>) {
        self.last_execution_time = Some(at);
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Write the whole ledger
    ///
    /// The write runs on the shared flush tracker, so it completes even if
    /// the calling future is dropped. Failures are logged; the in-memory
    /// ledger stays authoritative.
    pub async fn persist(&self) {
        let key = Self::storage_key(&self.strategy);
        let document = LedgerDocument {
            strategy: self.strategy.clone(),
            last_execution_time: self.last_execution_time,
            records: self.records.clone(),
        };

        let value = match serde_json::to_value(&document) {
            Ok(v) => v,
            Err(e) => {
                warn!(strategy = %self.strategy, error = %e, "Failed to serialize appearance ledger");
                return;
            }
        };

        let store = self.store.clone();
        let handle = self.flushes.spawn(async move {
            if let Err(e) = store.save(&key, &value).await {
                warn!(key = %key, error = %e, "Failed to persist appearance ledger");
            }
        });

        if let Err(e) = handle.await {
            warn!(strategy = %self.strategy, error = %e, "Ledger flush task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn settings(min: u32) -> LedgerSettings {
        LedgerSettings {
            min_consecutive_appearances: min,
            ..Default::default()
        }
    }

    fn ledger(min: u32) -> (AppearanceLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = AppearanceLedger::empty("test", settings(min), store.clone(), TaskTracker::new());
        (ledger, store)
    }

    fn snap(address: &str, liquidity: f64) -> TokenSnapshot {
        let mut s = TokenSnapshot::new(address, address.to_uppercase());
        s.liquidity_usd = liquidity;
        s
    }

    #[tokio::test]
    async fn test_consecutive_appearances_promote_token() {
        let (mut ledger, _) = ledger(3);
        let t0 = Utc::now();

        ledger.record("x", snap("x", 1.0), t0).await;
        ledger.record("x", snap("x", 1.0), t0 + Duration::hours(1)).await;
        assert!(!ledger.promising_tokens().contains("x"));

        let third = ledger.record("x", snap("x", 1.0), t0 + Duration::hours(2)).await;
        assert_eq!(third.consecutive_appearances, 3);
        assert!(ledger.promising_tokens().contains("x"));
    }

    #[tokio::test]
    async fn test_gap_resets_streak() {
        let (mut ledger, _) = ledger(2);
        let t0 = Utc::now();

        ledger.record("y", snap("y", 1.0), t0).await;
        let second = ledger.record("y", snap("y", 1.0), t0 + Duration::hours(10)).await;

        assert_eq!(second.consecutive_appearances, 1);
        assert_eq!(second.total_appearances, 2);
        assert_eq!(second.first_seen_at, t0);
        assert!(!ledger.promising_tokens().contains("y"));
    }

    #[tokio::test]
    async fn test_window_boundary() {
        let (mut ledger, _) = ledger(1);
        let t0 = Utc::now();

        ledger.record("a", snap("a", 1.0), t0).await;
        let just_under = ledger
            .record("a", snap("a", 1.0), t0 + Duration::hours(8) - Duration::seconds(1))
            .await;
        assert_eq!(just_under.consecutive_appearances, 2);

        let exactly = ledger
            .record(
                "a",
                snap("a", 1.0),
                t0 + Duration::hours(16) - Duration::seconds(1),
            )
            .await;
        assert_eq!(exactly.consecutive_appearances, 1);
    }

    #[tokio::test]
    async fn test_promising_boundary_inclusive() {
        let (mut ledger, _) = ledger(2);
        let t0 = Utc::now();

        ledger.record("a", snap("a", 1.0), t0).await;
        ledger.record("b", snap("b", 1.0), t0).await;
        ledger.record("b", snap("b", 1.0), t0 + Duration::minutes(30)).await;

        let promising = ledger.promising_tokens();
        assert!(!promising.contains("a"));
        assert!(promising.contains("b"));
    }

    #[tokio::test]
    async fn test_timestamp_history_capped() {
        let (mut ledger, _) = ledger(1);
        let t0 = Utc::now();

        let mut last = None;
        for i in 0..15 {
            last = Some(ledger.record("z", snap("z", 1.0), t0 + Duration::minutes(i)).await);
        }
        let record = last.unwrap();
        assert_eq!(record.appearance_timestamps.len(), DEFAULT_MAX_HISTORY);
        assert_eq!(record.appearance_timestamps[0], t0 + Duration::minutes(5));
        assert_eq!(record.consecutive_appearances, 15);
    }

    #[tokio::test]
    async fn test_liquidity_change_tracks_first_observation() {
        let (mut ledger, _) = ledger(1);
        let t0 = Utc::now();

        ledger.record("l", snap("l", 100_000.0), t0).await;
        let record = ledger
            .record("l", snap("l", 60_000.0), t0 + Duration::hours(1))
            .await;

        assert_eq!(record.initial_liquidity_usd, 100_000.0);
        assert!((record.liquidity_change_pct().unwrap() + 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prune_stale_records() {
        let (mut ledger, _) = ledger(1);
        let now = Utc::now();

        ledger.record("old", snap("old", 1.0), now - Duration::days(8)).await;
        ledger.record("fresh", snap("fresh", 1.0), now - Duration::days(1)).await;

        let removed = ledger.prune(DEFAULT_MAX_AGE_DAYS, now).await;
        assert_eq!(removed, 1);
        assert!(ledger.get("old").is_none());
        assert!(ledger.get("fresh").is_some());
    }

    #[tokio::test]
    async fn test_batch_counts_duplicates_once() {
        let (mut ledger, _) = ledger(1);
        let now = Utc::now();

        let batch = vec![snap("d", 1.0), snap("d", 2.0)];
        let recorded = ledger.record_batch(&batch, now).await;

        assert_eq!(recorded.len(), 1);
        assert_eq!(ledger.get("d").unwrap().total_appearances, 1);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let (mut ledger, store) = ledger(2);
        let now = Utc::now();
        ledger.set_last_execution_time(now);
        ledger.record("p", snap("p", 5.0), now).await;

        let reloaded =
            AppearanceLedger::load("test", settings(2), store.clone(), TaskTracker::new()).await;
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.last_execution_time(), Some(now));
        assert_eq!(reloaded.get("p").unwrap().initial_liquidity_usd, 5.0);
    }

    #[tokio::test]
    async fn test_corrupt_storage_degrades_to_empty() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(
            &AppearanceLedger::storage_key("test"),
            json!({"records": "not a map"}),
        );

        let ledger = AppearanceLedger::load("test", settings(1), store, TaskTracker::new()).await;
        assert!(ledger.is_empty());
    }
}
