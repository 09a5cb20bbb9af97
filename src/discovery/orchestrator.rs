//! Tiered discovery orchestrator
//!
//! Runs the strategies in a fixed order, relaxing thresholds one step per
//! tier until enough fresh candidates have accumulated. Results of later
//! tiers add to earlier ones. A cycle that ends with nothing at all clears
//! the dedup cache so the next cycle can look at the whole universe again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::discovery::dedup::{DedupCache, DEFAULT_DEDUP_TTL_MINUTES};
use crate::discovery::provider::MarketDataProvider;
use crate::discovery::relaxation::{FilterRelaxationPolicy, RelaxationLevel};
use crate::discovery::strategy::{
    DiscoveryStrategy, LedgerConfig, StrategyDefinition, StrategyDeps,
};
use crate::error::{Error, Result};
use crate::scoring::MomentumScorer;
use crate::types::Candidate;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Candidates requested per cycle when the caller does not say
    #[serde(default = "default_requested_count")]
    pub requested_count: usize,
    /// Fraction of the requested count that ends the cycle early
    #[serde(default = "default_min_yield_fraction")]
    pub min_yield_fraction: f64,
    #[serde(default = "default_dedup_ttl_minutes")]
    pub dedup_ttl_minutes: i64,
    /// Max addresses per security classifier call
    #[serde(default = "default_classifier_batch_size")]
    pub classifier_batch_size: usize,
}

fn default_requested_count() -> usize {
    20
}
fn default_min_yield_fraction() -> f64 {
    0.25
}
fn default_dedup_ttl_minutes() -> i64 {
    DEFAULT_DEDUP_TTL_MINUTES
}
fn default_classifier_batch_size() -> usize {
    50
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            requested_count: default_requested_count(),
            min_yield_fraction: default_min_yield_fraction(),
            dedup_ttl_minutes: default_dedup_ttl_minutes(),
            classifier_batch_size: default_classifier_batch_size(),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.requested_count == 0 {
            return Err(Error::Config("requested_count must be positive".to_string()));
        }
        if !(self.min_yield_fraction > 0.0 && self.min_yield_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "min_yield_fraction must be in (0, 1], got {}",
                self.min_yield_fraction
            )));
        }
        if self.dedup_ttl_minutes <= 0 {
            return Err(Error::Config("dedup_ttl_minutes must be positive".to_string()));
        }
        if self.classifier_batch_size == 0 {
            return Err(Error::Config("classifier_batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Yield that stops escalation: ceil(fraction x requested), at least 1
    pub fn min_yield_threshold(&self, requested: usize) -> usize {
        ((requested as f64 * self.min_yield_fraction).ceil() as usize).max(1)
    }
}

/// One tier: a strategy and the provider it queries
#[derive(Clone)]
pub struct Tier {
    pub strategy: Arc<DiscoveryStrategy>,
    pub provider: Arc<dyn MarketDataProvider>,
}

/// Per-tier statistics of a cycle
#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub tier: usize,
    pub strategy: String,
    pub level: RelaxationLevel,
    /// Candidates the strategy returned
    pub fetched: usize,
    /// New, not recently analyzed candidates added to the pool
    pub added: usize,
    /// Pool candidates passing the level's thresholds after this tier
    pub yield_count: usize,
    pub elapsed_ms: u64,
}

/// Result of one discovery cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryOutcome {
    pub candidates: Vec<Candidate>,
    pub final_level: RelaxationLevel,
    pub yield_threshold: usize,
    pub tiers: Vec<TierReport>,
    pub dedup_cleared: bool,
}

/// Runs discovery cycles over an ordered list of tiers
pub struct DiscoveryOrchestrator {
    tiers: Vec<Tier>,
    policy: FilterRelaxationPolicy,
    scorer: MomentumScorer,
    dedup: DedupCache,
    config: DiscoveryConfig,
    flushes: TaskTracker,
    cycle_lock: Mutex<()>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        tiers: Vec<Tier>,
        policy: FilterRelaxationPolicy,
        scorer: MomentumScorer,
        dedup: DedupCache,
        config: DiscoveryConfig,
        flushes: TaskTracker,
    ) -> Result<Self> {
        config.validate()?;
        if tiers.is_empty() {
            return Err(Error::Config("at least one discovery tier is required".to_string()));
        }
        let mut names = HashSet::new();
        for tier in &tiers {
            if !names.insert(tier.strategy.name().to_string()) {
                return Err(Error::Config(format!(
                    "duplicate strategy name '{}'",
                    tier.strategy.name()
                )));
            }
        }

        Ok(Self {
            tiers,
            policy,
            scorer,
            dedup,
            config,
            flushes,
            cycle_lock: Mutex::new(()),
        })
    }

    /// Build every strategy from its definition, all sharing one provider
    pub async fn from_definitions(
        definitions: Vec<StrategyDefinition>,
        ledger_config: &LedgerConfig,
        deps: StrategyDeps,
        provider: Arc<dyn MarketDataProvider>,
        policy: FilterRelaxationPolicy,
        scorer: MomentumScorer,
        config: DiscoveryConfig,
    ) -> Result<Self> {
        let mut tiers = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let strategy =
                DiscoveryStrategy::new(definition, ledger_config.clone(), deps.clone()).await?;
            tiers.push(Tier {
                strategy: Arc::new(strategy),
                provider: provider.clone(),
            });
        }

        let dedup = DedupCache::load(
            chrono::Duration::minutes(config.dedup_ttl_minutes),
            deps.store.clone(),
            deps.flushes.clone(),
        )
        .await;

        Self::new(tiers, policy, scorer, dedup, config, deps.flushes)
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Strategy by name
    pub fn strategy(&self, name: &str) -> Option<&Arc<DiscoveryStrategy>> {
        self.tiers
            .iter()
            .map(|t| &t.strategy)
            .find(|s| s.name() == name)
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Wait for every outstanding persistence write
    pub async fn wait_for_flushes(&self) {
        self.flushes.close();
        self.flushes.wait().await;
        self.flushes.reopen();
    }

    /// Run one cycle with the configured requested count
    pub async fn run_default_cycle(&self) -> DiscoveryOutcome {
        self.run_cycle(self.config.requested_count).await
    }

    /// Run one discovery cycle
    pub async fn run_cycle(&self, requested: usize) -> DiscoveryOutcome {
        let _cycle = self.cycle_lock.lock().await;
        self.wait_for_flushes().await;

        let now = Utc::now();
        let purged = self.dedup.purge(now);
        if purged > 0 {
            debug!(purged, "Expired dedup entries");
        }

        let requested = requested.max(1);
        let threshold = self.config.min_yield_threshold(requested);
        let max_level = self.policy.max_level();

        let mut level = RelaxationLevel::Strict;
        let mut pool: Vec<Candidate> = Vec::new();
        let mut pooled: HashSet<String> = HashSet::new();
        let mut reports = Vec::with_capacity(self.tiers.len());

        for (index, tier) in self.tiers.iter().enumerate() {
            if index > 0 {
                level = level.escalate(max_level);
            }
            let started = Instant::now();
            let strategy = &tier.strategy;

            let query_thresholds = self
                .policy
                .thresholds(level, strategy.base_thresholds(), false);
            let fetched = strategy
                .execute_with(tier.provider.as_ref(), &query_thresholds, strategy.deadline())
                .await;

            let fetched_count = fetched.len();
            let mut added = 0;
            for mut candidate in fetched {
                if self.dedup.contains_at(candidate.address(), now)
                    || !pooled.insert(candidate.address().to_string())
                {
                    continue;
                }
                candidate.tier = index;
                candidate.recent_listing = candidate
                    .snapshot
                    .is_recent_listing(now, self.policy.recent_listing_hours());
                candidate.momentum_score = self.scorer.score(&candidate.snapshot);
                pool.push(candidate);
                added += 1;
            }

            let yield_count = pool.iter().filter(|c| self.admits(level, c)).count();
            let report = TierReport {
                tier: index,
                strategy: strategy.name().to_string(),
                level,
                fetched: fetched_count,
                added,
                yield_count,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            info!(
                tier = index,
                strategy = %report.strategy,
                level = %level,
                fetched = fetched_count,
                added,
                yield_count,
                threshold,
                "Discovery tier complete"
            );
            reports.push(report);

            if yield_count >= threshold {
                break;
            }
        }

        let mut candidates: Vec<Candidate> =
            pool.into_iter().filter(|c| self.admits(level, c)).collect();

        let dedup_cleared = candidates.is_empty();
        if dedup_cleared {
            warn!(
                tiers = reports.len(),
                cached = self.dedup.len(),
                "No candidates from any tier, clearing dedup cache"
            );
            self.dedup.clear();
        } else {
            candidates.sort_by(|a, b| {
                b.momentum_score
                    .partial_cmp(&a.momentum_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            candidates.truncate(requested);
            self.mark_analyzed(&candidates, now);
        }
        self.dedup.persist().await;

        info!(
            candidates = candidates.len(),
            level = %level,
            tiers_run = reports.len(),
            "Discovery cycle complete"
        );

        DiscoveryOutcome {
            candidates,
            final_level: level,
            yield_threshold: threshold,
            tiers: reports,
            dedup_cleared,
        }
    }

    fn admits(&self, level: RelaxationLevel, candidate: &Candidate) -> bool {
        let Some(tier) = self.tiers.get(candidate.tier) else {
            return false;
        };
        let effective = self.policy.thresholds(
            level,
            tier.strategy.base_thresholds(),
            candidate.recent_listing,
        );
        effective.admits(&candidate.snapshot, candidate.momentum_score)
    }

    fn mark_analyzed(&self, candidates: &[Candidate], now: DateTime<Utc>) {
        for candidate in candidates {
            self.dedup.insert_at(candidate.address(), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::denylist::MajorTokenDenylist;
    use crate::discovery::provider::ProviderQuery;
    use crate::store::MemoryStore;
    use crate::types::{TokenSnapshot, TradeCount};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        tokens: Vec<TokenSnapshot>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn returning(tokens: Vec<TokenSnapshot>) -> Arc<Self> {
            Arc::new(Self {
                tokens,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                tokens: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn query(&self, _query: &ProviderQuery) -> Result<Vec<TokenSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Provider("boom".to_string()));
            }
            Ok(self.tokens.clone())
        }
    }

    fn token(address: &str) -> TokenSnapshot {
        let mut t = TokenSnapshot::new(address, address.to_uppercase());
        t.liquidity_usd = 200_000.0;
        t.market_cap = 2_000_000.0;
        t.volume.h24 = 400_000.0;
        t.txns.h24 = TradeCount::new(600, 400);
        t
    }

    fn tokens(prefix: &str, n: usize) -> Vec<TokenSnapshot> {
        (0..n).map(|i| token(&format!("{}{}", prefix, i))).collect()
    }

    async fn orchestrator(
        providers: Vec<Arc<MockProvider>>,
    ) -> (DiscoveryOrchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let flushes = TaskTracker::new();
        let deps = StrategyDeps {
            store: store.clone(),
            classifier: None,
            denylist: Arc::new(MajorTokenDenylist::default()),
            flushes: flushes.clone(),
            classifier_batch_size: 50,
        };

        let mut tiers = Vec::new();
        for (definition, provider) in StrategyDefinition::standard_tiers()
            .into_iter()
            .zip(providers)
        {
            let strategy = DiscoveryStrategy::new(definition, LedgerConfig::default(), deps.clone())
                .await
                .unwrap();
            tiers.push(Tier {
                strategy: Arc::new(strategy),
                provider,
            });
        }

        let dedup = DedupCache::new(
            chrono::Duration::minutes(DEFAULT_DEDUP_TTL_MINUTES),
            store.clone(),
            flushes.clone(),
        );
        let orchestrator = DiscoveryOrchestrator::new(
            tiers,
            FilterRelaxationPolicy::default(),
            MomentumScorer::default(),
            dedup,
            DiscoveryConfig::default(),
            flushes,
        )
        .unwrap();
        (orchestrator, store)
    }

    fn five(tier_tokens: [Vec<TokenSnapshot>; 5]) -> Vec<Arc<MockProvider>> {
        tier_tokens.into_iter().map(MockProvider::returning).collect()
    }

    #[test]
    fn test_min_yield_threshold() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.min_yield_threshold(20), 5);
        assert_eq!(config.min_yield_threshold(10), 3);
        assert_eq!(config.min_yield_threshold(1), 1);
    }

    #[tokio::test]
    async fn test_stops_once_yield_reached() {
        let providers = five([tokens("a", 2), tokens("b", 2), vec![], vec![], vec![]]);
        let (orch, _) = orchestrator(providers.clone()).await;

        let outcome = orch.run_cycle(4).await;
        assert_eq!(outcome.tiers.len(), 1);
        assert_eq!(outcome.final_level, RelaxationLevel::Strict);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(providers[1].calls(), 0);
    }

    #[tokio::test]
    async fn test_results_are_additive_across_tiers() {
        let providers = five([
            tokens("a", 2),
            tokens("b", 2),
            tokens("c", 2),
            tokens("d", 2),
            vec![],
        ]);
        let (orch, _) = orchestrator(providers.clone()).await;

        // threshold = 5: needs three tiers
        let outcome = orch.run_cycle(20).await;
        assert_eq!(outcome.tiers.len(), 3);
        assert_eq!(outcome.candidates.len(), 6);
        assert_eq!(outcome.final_level, RelaxationLevel::VeryRelaxed);
        assert_eq!(providers[3].calls(), 0);

        let levels: Vec<_> = outcome.tiers.iter().map(|t| t.level).collect();
        assert_eq!(
            levels,
            vec![
                RelaxationLevel::Strict,
                RelaxationLevel::Relaxed,
                RelaxationLevel::VeryRelaxed
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicates_across_tiers_count_once() {
        let providers = five([tokens("a", 2), tokens("a", 2), vec![], vec![], vec![]]);
        let (orch, _) = orchestrator(providers).await;

        let outcome = orch.run_cycle(20).await;
        assert_eq!(outcome.tiers.len(), 5);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.tiers[1].added, 0);
    }

    #[tokio::test]
    async fn test_failing_tier_does_not_abort() {
        let providers = vec![
            MockProvider::failing(),
            MockProvider::returning(tokens("b", 3)),
            MockProvider::returning(vec![]),
            MockProvider::returning(vec![]),
            MockProvider::returning(vec![]),
        ];
        let (orch, _) = orchestrator(providers).await;

        let outcome = orch.run_cycle(8).await;
        assert_eq!(outcome.tiers.len(), 2);
        assert_eq!(outcome.final_level, RelaxationLevel::Relaxed);
        assert_eq!(outcome.candidates.len(), 3);
        assert!(outcome.candidates.iter().all(|c| c.tier == 1));
    }

    #[tokio::test]
    async fn test_all_empty_clears_dedup() {
        let providers = five([vec![], vec![], vec![], vec![], vec![]]);
        let (orch, store) = orchestrator(providers.clone()).await;
        orch.dedup().insert("seen-earlier");

        let outcome = orch.run_cycle(10).await;
        assert!(outcome.candidates.is_empty());
        assert!(outcome.dedup_cleared);
        assert!(orch.dedup().is_empty());
        assert!(providers.iter().all(|p| p.calls() == 1));

        // Every strategy still recorded that it ran
        for tier in orch.tiers() {
            assert!(tier.strategy.last_execution_time().await.is_some());
        }
        assert!(store.get("dedup_cache").is_some());
    }

    #[tokio::test]
    async fn test_recently_analyzed_tokens_are_skipped() {
        let providers = five([tokens("a", 2), vec![], vec![], vec![], vec![]]);
        let (orch, _) = orchestrator(providers).await;

        let first = orch.run_cycle(4).await;
        assert_eq!(first.candidates.len(), 2);
        assert_eq!(orch.dedup().len(), 2);

        // Same universe again: nothing fresh, so the cache is reset
        let second = orch.run_cycle(4).await;
        assert!(second.candidates.is_empty());
        assert!(second.dedup_cleared);
        assert!(orch.dedup().is_empty());

        let third = orch.run_cycle(4).await;
        assert_eq!(third.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_relaxation_admits_borderline_token() {
        // 45k liquidity fails the 50k strict floor, passes the 40k relaxed one
        let mut borderline = token("edge");
        borderline.liquidity_usd = 45_000.0;
        let providers = five([vec![borderline], vec![], vec![], vec![], vec![]]);
        let (orch, _) = orchestrator(providers).await;

        let outcome = orch.run_cycle(4).await;
        assert_eq!(outcome.tiers[0].yield_count, 0);
        assert_eq!(outcome.tiers.len(), 2);
        assert_eq!(outcome.final_level, RelaxationLevel::Relaxed);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].address(), "edge");
    }

    #[tokio::test]
    async fn test_candidates_sorted_by_score_and_truncated() {
        let mut hot = token("hot");
        hot.price_change.h1 = Some(25.0);
        let providers = five([
            vec![token("cold0"), hot, token("cold1")],
            vec![],
            vec![],
            vec![],
            vec![],
        ]);
        let (orch, _) = orchestrator(providers).await;

        let outcome = orch.run_cycle(2).await;
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].address(), "hot");
        assert!(outcome.candidates[0].momentum_score > outcome.candidates[1].momentum_score);
    }

    #[test]
    fn test_invalid_config() {
        let config = DiscoveryConfig {
            min_yield_fraction: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
