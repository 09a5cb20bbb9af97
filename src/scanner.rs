//! Scan pipeline
//!
//! One scan = one discovery cycle followed by alert validation of every
//! candidate it produced. Candidates are validated concurrently; each one
//! succeeds or fails on its own.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::alert::{
    AlertCandidate, AlertDecision, AlertRecords, AlertSafetyValidator, Blocklist, LogSink,
    MultiSink, NotificationSink, SecurityFlags, ValidationStage, WebhookSink,
};
use crate::config::Config;
use crate::discovery::{
    Classification, DexScreenerProvider, DiscoveryOrchestrator, FilterRelaxationPolicy,
    MajorTokenDenylist, RelaxationLevel, RugCheckClassifier, SecurityClassifier, StrategyDeps,
};
use crate::phase::PhaseClassifier;
use crate::scoring::MomentumScorer;
use crate::store::{JsonFileStore, PersistentStore};
use crate::types::Candidate;

/// Summary of one scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub discovered: usize,
    pub final_level: RelaxationLevel,
    pub tiers_run: usize,
    pub dedup_cleared: bool,
    /// Symbols of accepted alerts
    pub accepted: Vec<String>,
    pub rejected: BTreeMap<ValidationStage, usize>,
    /// Identifiers blocklisted during this scan
    pub blocklisted: Vec<String>,
    pub elapsed_ms: u64,
}

impl ScanReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Discovery + validation + delivery
pub struct ScanPipeline {
    orchestrator: Arc<DiscoveryOrchestrator>,
    validator: Arc<AlertSafetyValidator>,
    phases: PhaseClassifier,
    sink: Arc<dyn NotificationSink>,
    security: Option<Arc<dyn SecurityClassifier>>,
    security_deadline: Duration,
}

fn flags_for(verdict: Option<Classification>) -> SecurityFlags {
    match verdict {
        Some(Classification::Healthy) => SecurityFlags::default(),
        Some(Classification::Scam) => SecurityFlags {
            is_scam: true,
            is_risky: false,
        },
        // Unclassified tokens are held to the risky score floor
        Some(Classification::Risky) | None => SecurityFlags {
            is_scam: false,
            is_risky: true,
        },
    }
}

impl ScanPipeline {
    pub fn new(
        orchestrator: Arc<DiscoveryOrchestrator>,
        validator: Arc<AlertSafetyValidator>,
        phases: PhaseClassifier,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            orchestrator,
            validator,
            phases,
            sink,
            security: None,
            security_deadline: Duration::from_secs(15),
        }
    }

    /// Classify candidates that discovery did not already vet
    pub fn with_security(mut self, classifier: Arc<dyn SecurityClassifier>, deadline: Duration) -> Self {
        self.security = Some(classifier);
        self.security_deadline = deadline;
        self
    }

    /// Wire the full pipeline from configuration
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn PersistentStore> = Arc::new(JsonFileStore::new(&config.storage.data_dir));
        let flushes = TaskTracker::new();

        let denylist = MajorTokenDenylist::new(
            &config.denylist.extra_addresses,
            &config.denylist.extra_symbol_patterns,
        )?;
        let classifier: Option<Arc<dyn SecurityClassifier>> = if config.rugcheck.enabled {
            Some(Arc::new(RugCheckClassifier::new(config.rugcheck.clone())?))
        } else {
            None
        };
        let deps = StrategyDeps {
            store: store.clone(),
            classifier: classifier.clone(),
            denylist: Arc::new(denylist),
            flushes: flushes.clone(),
            classifier_batch_size: config.discovery.classifier_batch_size,
        };

        let provider = Arc::new(DexScreenerProvider::new(config.dexscreener.clone())?);
        let orchestrator = DiscoveryOrchestrator::from_definitions(
            config.strategies.clone(),
            &config.ledger,
            deps,
            provider,
            FilterRelaxationPolicy::new(config.relaxation.clone())?,
            MomentumScorer::new(config.scoring.clone())?,
            config.discovery.clone(),
        )
        .await?;

        let blocklist = Arc::new(Blocklist::load(store.clone(), flushes.clone()).await);
        let records = AlertRecords::load(
            chrono::Duration::minutes(config.alerts.cooldown_minutes),
            store,
            flushes,
        )
        .await;
        let validator = AlertSafetyValidator::new(config.alerts.clone(), blocklist, records)?;

        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
        if config.notifications.log {
            sinks.push(Box::new(LogSink));
        }
        if let Some(url) = config.webhook_url()? {
            sinks.push(Box::new(WebhookSink::new(
                url,
                Duration::from_secs(config.notifications.webhook_timeout_secs),
                Duration::from_secs(config.notifications.webhook_max_elapsed_secs),
            )?));
        }

        info!(
            tiers = config.strategies.len(),
            sinks = sinks.len(),
            security = classifier.is_some(),
            data_dir = %config.storage.data_dir.display(),
            "Scan pipeline ready"
        );

        let pipeline = Self::new(
            Arc::new(orchestrator),
            Arc::new(validator),
            PhaseClassifier::new(config.phase.clone())?,
            Arc::new(MultiSink::new(sinks)),
        );
        Ok(match classifier {
            Some(classifier) => {
                pipeline.with_security(classifier, Duration::from_secs(config.rugcheck.timeout_secs))
            }
            None => pipeline,
        })
    }

    pub fn orchestrator(&self) -> &Arc<DiscoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn validator(&self) -> &Arc<AlertSafetyValidator> {
        &self.validator
    }

    /// Security flags per candidate address
    ///
    /// Verdicts carried from discovery are reused. The rest are classified
    /// in one batch; tokens the classifier misses, or a failed batch, count
    /// as risky. Without a classifier every candidate gets default flags.
    async fn security_flags(&self, candidates: &[Candidate]) -> HashMap<String, SecurityFlags> {
        let Some(classifier) = &self.security else {
            return HashMap::new();
        };

        let pending: Vec<String> = candidates
            .iter()
            .filter(|c| c.security.is_none())
            .map(|c| c.snapshot.address.clone())
            .collect();

        let verdicts = if pending.is_empty() {
            HashMap::new()
        } else {
            match tokio::time::timeout(self.security_deadline, classifier.classify_batch(&pending)).await {
                Ok(Ok(verdicts)) => verdicts,
                Ok(Err(e)) => {
                    warn!(tokens = pending.len(), error = %e, "Alert security check failed");
                    HashMap::new()
                }
                Err(_) => {
                    warn!(
                        tokens = pending.len(),
                        deadline_ms = self.security_deadline.as_millis() as u64,
                        "Alert security check timed out"
                    );
                    HashMap::new()
                }
            }
        };

        candidates
            .iter()
            .map(|c| {
                let verdict = c.security.or_else(|| verdicts.get(&c.snapshot.address).copied());
                (c.snapshot.address.clone(), flags_for(verdict))
            })
            .collect()
    }

    /// One discovery cycle plus validation of its candidates
    pub async fn run_once(&self, requested: usize) -> ScanReport {
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        let outcome = self.orchestrator.run_cycle(requested).await;
        let flags = self.security_flags(&outcome.candidates).await;

        let alerts: Vec<AlertCandidate> = outcome
            .candidates
            .iter()
            .map(|c| {
                let assessment = self.phases.classify(&c.snapshot);
                AlertCandidate::from_snapshot(
                    &c.snapshot,
                    c.momentum_score,
                    &assessment,
                    flags.get(&c.snapshot.address).copied().unwrap_or_default(),
                )
                .with_strategy(c.strategy.clone())
            })
            .collect();

        let decisions = join_all(
            alerts
                .iter()
                .map(|a| self.validator.process(a, self.sink.as_ref())),
        )
        .await;

        let mut accepted = Vec::new();
        let mut rejected = BTreeMap::new();
        let mut blocklisted = Vec::new();
        for (alert, decision) in alerts.iter().zip(decisions) {
            match decision {
                AlertDecision::Accept => accepted.push(alert.symbol.clone()),
                AlertDecision::Reject(rejection) => {
                    *rejected.entry(rejection.stage).or_insert(0) += 1;
                    if rejection.blocklisted {
                        blocklisted.push(alert.token_address.clone());
                    }
                }
            }
        }

        let report = ScanReport {
            started_at,
            discovered: outcome.candidates.len(),
            final_level: outcome.final_level,
            tiers_run: outcome.tiers.len(),
            dedup_cleared: outcome.dedup_cleared,
            accepted,
            rejected,
            blocklisted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            discovered = report.discovered,
            accepted = report.accepted.len(),
            rejected = report.rejected_total(),
            blocklisted = report.blocklisted.len(),
            level = %report.final_level,
            elapsed_ms = report.elapsed_ms,
            "Scan complete"
        );
        report
    }

    /// Scan every `interval` until `cancel` fires
    ///
    /// Cancelling mid-cycle abandons the cycle, but persistence writes
    /// already started are awaited before returning.
    pub async fn run(&self, interval: Duration, requested: usize, cancel: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut scans = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Scan cancelled mid-cycle");
                    break;
                }
                _ = self.run_once(requested) => {
                    scans += 1;
                }
            }
        }

        self.orchestrator.wait_for_flushes().await;
        info!(scans, "Scan loop stopped");
        scans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertConfig, ChannelSink};
    use crate::discovery::{
        DedupCache, DiscoveryConfig, DiscoveryStrategy, LedgerConfig, MarketDataProvider,
        ProviderQuery, StrategyDefinition, Tier,
    };
    use crate::error::{Error, Result};
    use crate::store::MemoryStore;
    use crate::types::{TokenSnapshot, TradeCount};
    use async_trait::async_trait;
    use serde_json::Value;

    type EventLog = Arc<std::sync::Mutex<Vec<String>>>;

    struct FixedProvider(Vec<TokenSnapshot>);

    #[async_trait]
    impl MarketDataProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn query(&self, _query: &ProviderQuery) -> Result<Vec<TokenSnapshot>> {
            Ok(self.0.clone())
        }
    }

    /// Records each query in the shared event log
    struct LoggingProvider {
        tokens: Vec<TokenSnapshot>,
        log: EventLog,
    }

    #[async_trait]
    impl MarketDataProvider for LoggingProvider {
        fn name(&self) -> &str {
            "logging"
        }

        async fn query(&self, _query: &ProviderQuery) -> Result<Vec<TokenSnapshot>> {
            self.log.lock().unwrap().push("query".to_string());
            Ok(self.tokens.clone())
        }
    }

    /// Memory store whose saves take 300ms
    struct SlowStore {
        inner: MemoryStore,
        log: EventLog,
    }

    #[async_trait]
    impl PersistentStore for SlowStore {
        async fn load(&self, key: &str) -> Result<Option<Value>> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, document: &Value) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.inner.save(key, document).await?;
            self.log.lock().unwrap().push(format!("saved {}", key));
            Ok(())
        }
    }

    /// Fixed verdicts; `None` fails every batch
    struct FixedClassifier(Option<HashMap<String, Classification>>);

    #[async_trait]
    impl SecurityClassifier for FixedClassifier {
        async fn classify_batch(&self, addresses: &[String]) -> Result<HashMap<String, Classification>> {
            let verdicts = self
                .0
                .as_ref()
                .ok_or_else(|| Error::Classifier("service unavailable".to_string()))?;
            Ok(addresses
                .iter()
                .filter_map(|a| verdicts.get(a).map(|v| (a.clone(), *v)))
                .collect())
        }
    }

    fn pumping(address: &str, liquidity: f64) -> TokenSnapshot {
        let mut t = TokenSnapshot::new(address, address.to_uppercase());
        t.liquidity_usd = liquidity;
        t.market_cap = 3_000_000.0;
        t.volume.h24 = 600_000.0;
        t.volume_change_h1 = Some(100.0);
        t.price_change.h1 = Some(10.0);
        t.price_change.h24 = Some(30.0);
        t.txns.h1 = TradeCount::new(200, 100);
        t.txns.h24 = TradeCount::new(600, 400);
        t
    }

    async fn pipeline_with(
        store: Arc<dyn PersistentStore>,
        provider: Arc<dyn MarketDataProvider>,
    ) -> (ScanPipeline, async_channel::Receiver<crate::alert::AlertPayload>) {
        let flushes = TaskTracker::new();
        let deps = StrategyDeps {
            store: store.clone(),
            classifier: None,
            denylist: Arc::new(MajorTokenDenylist::default()),
            flushes: flushes.clone(),
            classifier_batch_size: 50,
        };

        let mut tiers = Vec::new();
        for (i, definition) in StrategyDefinition::standard_tiers().into_iter().enumerate() {
            let strategy = DiscoveryStrategy::new(definition, LedgerConfig::default(), deps.clone())
                .await
                .unwrap();
            tiers.push(Tier {
                strategy: Arc::new(strategy),
                provider: if i == 0 {
                    provider.clone()
                } else {
                    Arc::new(FixedProvider(vec![])) as Arc<dyn MarketDataProvider>
                },
            });
        }

        let dedup = DedupCache::new(chrono::Duration::minutes(45), store.clone(), flushes.clone());
        let orchestrator = DiscoveryOrchestrator::new(
            tiers,
            FilterRelaxationPolicy::default(),
            MomentumScorer::default(),
            dedup,
            DiscoveryConfig::default(),
            flushes.clone(),
        )
        .unwrap();

        let blocklist = Arc::new(Blocklist::new(store.clone(), flushes.clone()));
        let records = AlertRecords::new(chrono::Duration::minutes(30), store, flushes);
        let validator = AlertSafetyValidator::new(AlertConfig::default(), blocklist, records).unwrap();

        let (sink, receiver) = ChannelSink::bounded(16);
        let pipeline = ScanPipeline::new(
            Arc::new(orchestrator),
            Arc::new(validator),
            PhaseClassifier::default(),
            Arc::new(sink),
        );
        (pipeline, receiver)
    }

    async fn pipeline(
        tokens: Vec<TokenSnapshot>,
    ) -> (ScanPipeline, async_channel::Receiver<crate::alert::AlertPayload>) {
        pipeline_with(Arc::new(MemoryStore::new()), Arc::new(FixedProvider(tokens))).await
    }

    #[tokio::test]
    async fn test_run_once_accepts_and_rejects() {
        let (pipeline, receiver) = pipeline(vec![
            pumping("strong", 250_000.0),
            // Passes discovery floors, fails the alert liquidity floor
            pumping("thin", 60_000.0),
        ])
        .await;

        let report = pipeline.run_once(4).await;
        assert_eq!(report.discovered, 2);
        assert_eq!(report.accepted, vec!["STRONG".to_string()]);
        assert_eq!(report.rejected.get(&ValidationStage::Sustainability), Some(&1));
        assert!(report.blocklisted.is_empty());

        let payload = receiver.recv().await.unwrap();
        assert_eq!(payload.symbol, "STRONG");
        assert_eq!(payload.strategy.as_deref(), Some("volume_surge"));
    }

    #[tokio::test]
    async fn test_repeat_scan_is_deduplicated() {
        let (pipeline, _rx) = pipeline(vec![pumping("strong", 250_000.0)]).await;

        assert_eq!(pipeline.run_once(4).await.accepted.len(), 1);

        let second = pipeline.run_once(4).await;
        assert_eq!(second.discovered, 0);
        assert!(second.dedup_cleared);
    }

    #[tokio::test]
    async fn test_security_verdicts_reach_validator() {
        let (pipeline, receiver) = pipeline(vec![
            pumping("strong", 250_000.0),
            pumping("shady", 250_000.0),
            pumping("rug", 250_000.0),
        ])
        .await;
        let verdicts = HashMap::from([
            ("strong".to_string(), Classification::Healthy),
            ("shady".to_string(), Classification::Risky),
            ("rug".to_string(), Classification::Scam),
        ]);
        let pipeline = pipeline.with_security(
            Arc::new(FixedClassifier(Some(verdicts))),
            Duration::from_secs(1),
        );

        // All three score about 71: above the alert floor, below the risky floor
        let report = pipeline.run_once(4).await;
        assert_eq!(report.discovered, 3);
        assert_eq!(report.accepted, vec!["STRONG".to_string()]);
        assert_eq!(report.rejected.get(&ValidationStage::Security), Some(&2));
        assert_eq!(report.blocklisted, vec!["rug".to_string()]);

        assert!(pipeline.validator().blocklist().contains("rug").await);
        assert!(!pipeline.validator().blocklist().contains("shady").await);
        assert_eq!(receiver.recv().await.unwrap().symbol, "STRONG");
    }

    #[tokio::test]
    async fn test_unclassified_tokens_count_as_risky() {
        let (pipeline, _rx) = pipeline(vec![pumping("strong", 250_000.0)]).await;
        let pipeline = pipeline.with_security(Arc::new(FixedClassifier(None)), Duration::from_secs(1));

        let report = pipeline.run_once(4).await;
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.get(&ValidationStage::Security), Some(&1));
        assert!(report.blocklisted.is_empty());
    }

    #[test]
    fn test_flags_for_verdicts() {
        assert_eq!(flags_for(Some(Classification::Healthy)), SecurityFlags::default());
        assert!(flags_for(Some(Classification::Scam)).is_scam);
        assert!(flags_for(Some(Classification::Risky)).is_risky);
        assert!(flags_for(None).is_risky);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (pipeline, _rx) = pipeline(vec![pumping("strong", 250_000.0)]).await;
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let scans = pipeline.run(Duration::from_secs(3600), 4, cancel).await;
        assert_eq!(scans, 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_cycle_completes_pending_save() {
        let log = EventLog::default();
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            log: log.clone(),
        });
        let provider = Arc::new(LoggingProvider {
            tokens: vec![pumping("strong", 250_000.0)],
            log: log.clone(),
        });
        let (pipeline, _rx) = pipeline_with(store.clone(), provider).await;

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        let scans = pipeline.run(Duration::from_secs(3600), 4, cancel).await;
        assert_eq!(scans, 0);
        assert!(store.inner.get("appearances/volume_surge").is_some());
    }

    #[tokio::test]
    async fn test_next_cycle_waits_for_abandoned_saves() {
        let log = EventLog::default();
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            log: log.clone(),
        });
        let provider = Arc::new(LoggingProvider {
            tokens: vec![pumping("strong", 250_000.0)],
            log: log.clone(),
        });
        let (pipeline, _rx) = pipeline_with(store, provider).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(50), pipeline.run_once(4)).await;
        assert!(abandoned.is_err());
        assert_eq!(log.lock().unwrap().clone(), vec!["query".to_string()]);

        pipeline.run_once(4).await;

        let events = log.lock().unwrap().clone();
        let saved = events
            .iter()
            .position(|e| e == "saved appearances/volume_surge")
            .unwrap();
        let second_query = events
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == "query")
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(saved < second_query, "events: {:?}", events);
    }
}
