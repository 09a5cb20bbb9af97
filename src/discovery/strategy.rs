//! Discovery strategies
//!
//! A strategy is a named provider query plus a postprocessing policy:
//! security classification, appearance tracking, and a fixed set of risk
//! filters chosen by its `StrategyKind`. Strategies never fail outward;
//! a provider error, malformed response or deadline expiry just yields no
//! candidates.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::discovery::denylist::MajorTokenDenylist;
use crate::discovery::ledger::{AppearanceLedger, AppearanceRecord, LedgerSettings};
use crate::discovery::provider::{
    MarketDataProvider, ProviderQuery, QueryEndpoint, QueryFilters, SortDirection, SortKey,
};
use crate::discovery::relaxation::Thresholds;
use crate::discovery::security::{Classification, SecurityClassifier};
use crate::error::{Error, Result};
use crate::store::PersistentStore;
use crate::types::{Candidate, TokenSnapshot};

/// Concrete strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Tokens whose hourly volume is accelerating
    VolumeSurge,
    /// Tokens with the most recent trades
    RecentActivity,
    /// Provider's curated trending list
    Trending,
    /// Largest by market cap
    Valuation,
    /// Deepest liquidity pools
    DeepLiquidity,
}

impl StrategyKind {
    /// Default endpoint, sort key and direction
    pub fn default_sort(&self) -> (QueryEndpoint, SortKey, SortDirection) {
        match self {
            StrategyKind::VolumeSurge => (
                QueryEndpoint::Listing,
                SortKey::VolumeChange1h,
                SortDirection::Descending,
            ),
            StrategyKind::RecentActivity => (
                QueryEndpoint::Listing,
                SortKey::LastTradeTime,
                SortDirection::Descending,
            ),
            StrategyKind::Trending => (
                QueryEndpoint::Trending,
                SortKey::ProviderRank,
                SortDirection::Descending,
            ),
            StrategyKind::Valuation => (
                QueryEndpoint::Listing,
                SortKey::MarketCap,
                SortDirection::Descending,
            ),
            StrategyKind::DeepLiquidity => (
                QueryEndpoint::Listing,
                SortKey::Liquidity,
                SortDirection::Descending,
            ),
        }
    }

    /// Risk filters this kind applies after appearance tracking
    pub fn risk_filters(&self) -> &'static [RiskFilter] {
        match self {
            StrategyKind::VolumeSurge => &[RiskFilter::VolumeSpike, RiskFilter::WashTrading],
            StrategyKind::RecentActivity => {
                &[RiskFilter::UnconfirmedGain, RiskFilter::WashTrading]
            }
            StrategyKind::Trending => &[RiskFilter::UnconfirmedGain],
            StrategyKind::Valuation => &[RiskFilter::LiquidityDecline],
            StrategyKind::DeepLiquidity => {
                &[RiskFilter::LiquidityDecline, RiskFilter::VolumeSpike]
            }
        }
    }

    pub fn default_name(&self) -> &'static str {
        match self {
            StrategyKind::VolumeSurge => "volume_surge",
            StrategyKind::RecentActivity => "recent_activity",
            StrategyKind::Trending => "trending",
            StrategyKind::Valuation => "valuation",
            StrategyKind::DeepLiquidity => "deep_liquidity",
        }
    }

    fn default_description(&self) -> &'static str {
        match self {
            StrategyKind::VolumeSurge => "Sorted by 1h volume change",
            StrategyKind::RecentActivity => "Sorted by most recent trade",
            StrategyKind::Trending => "Provider trending list",
            StrategyKind::Valuation => "Sorted by market cap",
            StrategyKind::DeepLiquidity => "Sorted by pool liquidity",
        }
    }

    fn default_min_consecutive(&self) -> u32 {
        match self {
            StrategyKind::VolumeSurge | StrategyKind::RecentActivity => 2,
            StrategyKind::Trending => 1,
            StrategyKind::Valuation | StrategyKind::DeepLiquidity => 3,
        }
    }
}

/// Strategy-specific risk filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFilter {
    /// 24h volume far above the 7-day daily average
    VolumeSpike,
    /// Large price gain without matching volume
    UnconfirmedGain,
    /// Too many trades for the market cap
    WashTrading,
    /// Liquidity fell since the strategy first saw the token
    LiquidityDecline,
}

/// Why a risk filter rejected a token
#[derive(Debug, Clone, PartialEq)]
pub enum RiskRejection {
    VolumeSpike { volume_24h: f64, avg_daily: f64 },
    UnconfirmedGain { gain_pct: f64, turnover: f64 },
    WashTrading { trades_per_1k_mcap: f64 },
    LiquidityDecline { change_pct: f64 },
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskRejection::VolumeSpike {
                volume_24h,
                avg_daily,
            } => write!(
                f,
                "24h volume ${:.0} vs 7d average ${:.0}/day",
                volume_24h, avg_daily
            ),
            RiskRejection::UnconfirmedGain { gain_pct, turnover } => write!(
                f,
                "price +{:.1}% with only {:.2}x volume/liquidity",
                gain_pct, turnover
            ),
            RiskRejection::WashTrading { trades_per_1k_mcap } => write!(
                f,
                "{:.1} trades per $1k market cap",
                trades_per_1k_mcap
            ),
            RiskRejection::LiquidityDecline { change_pct } => {
                write!(f, "liquidity {:.1}% since first seen", change_pct)
            }
        }
    }
}

/// Risk filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Reject when 24h volume > 7d average daily volume x this
    #[serde(default = "default_volume_spike_multiplier")]
    pub max_volume_spike_multiplier: f64,
    /// 24h gain (%) above which volume confirmation is required
    #[serde(default = "default_max_price_gain")]
    pub max_price_gain_pct: f64,
    /// Minimum 24h volume / liquidity that confirms a large gain
    #[serde(default = "default_volume_confirmation")]
    pub min_volume_confirmation_ratio: f64,
    /// Anti-wash-trading ceiling on 24h trades per $1k market cap
    #[serde(default = "default_max_trades_per_1k_mcap")]
    pub max_trades_per_1k_mcap: f64,
    /// Tolerated liquidity decline since first observation (%)
    #[serde(default)]
    pub max_liquidity_decline_pct: f64,
}

fn default_volume_spike_multiplier() -> f64 {
    10.0
}
fn default_max_price_gain() -> f64 {
    300.0
}
fn default_volume_confirmation() -> f64 {
    0.5
}
fn default_max_trades_per_1k_mcap() -> f64 {
    10.0
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_volume_spike_multiplier: default_volume_spike_multiplier(),
            max_price_gain_pct: default_max_price_gain(),
            min_volume_confirmation_ratio: default_volume_confirmation(),
            max_trades_per_1k_mcap: default_max_trades_per_1k_mcap(),
            max_liquidity_decline_pct: 0.0,
        }
    }
}

impl RiskParameters {
    /// Evaluate one filter; `Err` carries the rejection
    pub fn check(
        &self,
        filter: RiskFilter,
        token: &TokenSnapshot,
        record: Option<&AppearanceRecord>,
    ) -> std::result::Result<(), RiskRejection> {
        match filter {
            RiskFilter::VolumeSpike => match token.volume_7d_avg {
                Some(avg) if avg > 0.0 && token.volume.h24 > avg * self.max_volume_spike_multiplier => {
                    Err(RiskRejection::VolumeSpike {
                        volume_24h: token.volume.h24,
                        avg_daily: avg,
                    })
                }
                _ => Ok(()),
            },
            RiskFilter::UnconfirmedGain => {
                let gain = token.price_change.h24.unwrap_or(0.0);
                if gain <= self.max_price_gain_pct {
                    return Ok(());
                }
                let turnover = if token.liquidity_usd > 0.0 {
                    token.volume.h24 / token.liquidity_usd
                } else {
                    0.0
                };
                if turnover < self.min_volume_confirmation_ratio {
                    Err(RiskRejection::UnconfirmedGain {
                        gain_pct: gain,
                        turnover,
                    })
                } else {
                    Ok(())
                }
            }
            RiskFilter::WashTrading => {
                if token.market_cap <= 0.0 {
                    return Ok(());
                }
                let per_1k = token.txns.h24.total() as f64 / (token.market_cap / 1_000.0);
                if per_1k > self.max_trades_per_1k_mcap {
                    Err(RiskRejection::WashTrading {
                        trades_per_1k_mcap: per_1k,
                    })
                } else {
                    Ok(())
                }
            }
            RiskFilter::LiquidityDecline => match record.and_then(|r| r.liquidity_change_pct()) {
                Some(change) if change < -self.max_liquidity_decline_pct => {
                    Err(RiskRejection::LiquidityDecline { change_pct: change })
                }
                _ => Ok(()),
            },
        }
    }
}

/// Configuration of one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    pub kind: StrategyKind,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Overrides the kind's default sort key
    #[serde(default)]
    pub sort_by: Option<SortKey>,
    #[serde(default)]
    pub direction: Option<SortDirection>,
    /// Base (strict) thresholds
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default = "default_min_consecutive")]
    pub min_consecutive_appearances: u32,
    #[serde(default)]
    pub risk: RiskParameters,
    /// Deadline for the provider call (ms)
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Run the security classifier on results
    #[serde(default = "default_true")]
    pub security_filter: bool,
}

fn default_page_size() -> usize {
    50
}
fn default_min_consecutive() -> u32 {
    1
}
fn default_deadline_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl StrategyDefinition {
    /// Definition with the kind's defaults
    pub fn for_kind(kind: StrategyKind) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            description: kind.default_description().to_string(),
            page_size: default_page_size(),
            sort_by: None,
            direction: None,
            thresholds: Thresholds::default(),
            min_consecutive_appearances: kind.default_min_consecutive(),
            risk: RiskParameters::default(),
            deadline_ms: default_deadline_ms(),
            security_filter: true,
        }
    }

    /// The five standard tiers, in order
    pub fn standard_tiers() -> Vec<StrategyDefinition> {
        [
            StrategyKind::VolumeSurge,
            StrategyKind::RecentActivity,
            StrategyKind::Trending,
            StrategyKind::Valuation,
            StrategyKind::DeepLiquidity,
        ]
        .into_iter()
        .map(Self::for_kind)
        .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("strategy name cannot be empty".to_string()));
        }
        // Names become storage keys; keep them one-to-one with file names
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Config(format!(
                "strategy name '{}' may only contain ASCII letters, digits, '_' and '-'",
                self.name
            )));
        }
        if self.min_consecutive_appearances < 1 {
            return Err(Error::Config(format!(
                "strategy '{}': min_consecutive_appearances must be >= 1",
                self.name
            )));
        }
        if self.page_size == 0 {
            return Err(Error::Config(format!(
                "strategy '{}': page_size must be positive",
                self.name
            )));
        }
        if self.deadline_ms == 0 {
            return Err(Error::Config(format!(
                "strategy '{}': deadline_ms must be positive",
                self.name
            )));
        }
        if self.risk.max_volume_spike_multiplier <= 0.0
            || self.risk.max_trades_per_1k_mcap <= 0.0
            || self.risk.max_liquidity_decline_pct < 0.0
        {
            return Err(Error::Config(format!(
                "strategy '{}': risk parameters must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Ledger tunables shared by all strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_window_hours")]
    pub consecutive_window_hours: i64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

fn default_window_hours() -> i64 {
    crate::discovery::ledger::DEFAULT_CONSECUTIVE_WINDOW_HOURS
}
fn default_max_history() -> usize {
    crate::discovery::ledger::DEFAULT_MAX_HISTORY
}
fn default_max_age_days() -> i64 {
    crate::discovery::ledger::DEFAULT_MAX_AGE_DAYS
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            consecutive_window_hours: default_window_hours(),
            max_history: default_max_history(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.consecutive_window_hours <= 0 || self.max_age_days <= 0 || self.max_history == 0 {
            return Err(Error::Config(
                "ledger window, history and max age must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Collaborators shared by every strategy
#[derive(Clone)]
pub struct StrategyDeps {
    pub store: Arc<dyn PersistentStore>,
    pub classifier: Option<Arc<dyn SecurityClassifier>>,
    pub denylist: Arc<MajorTokenDenylist>,
    pub flushes: TaskTracker,
    /// Max addresses per classifier call
    pub classifier_batch_size: usize,
}

/// A named discovery strategy with its own appearance ledger
pub struct DiscoveryStrategy {
    definition: StrategyDefinition,
    ledger_config: LedgerConfig,
    deps: StrategyDeps,
    ledger: Mutex<AppearanceLedger>,
}

impl DiscoveryStrategy {
    /// Build a strategy and load its ledger
    pub async fn new(
        definition: StrategyDefinition,
        ledger_config: LedgerConfig,
        deps: StrategyDeps,
    ) -> Result<Self> {
        definition.validate()?;
        ledger_config.validate()?;

        let settings = LedgerSettings {
            min_consecutive_appearances: definition.min_consecutive_appearances,
            consecutive_window: chrono::Duration::hours(ledger_config.consecutive_window_hours),
            max_history: ledger_config.max_history,
        };
        let ledger = AppearanceLedger::load(
            &definition.name,
            settings,
            deps.store.clone(),
            deps.flushes.clone(),
        )
        .await;

        Ok(Self {
            definition,
            ledger_config,
            deps,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn kind(&self) -> StrategyKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &StrategyDefinition {
        &self.definition
    }

    pub fn base_thresholds(&self) -> &Thresholds {
        &self.definition.thresholds
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.definition.deadline_ms)
    }

    /// Provider query for the given (possibly relaxed) thresholds
    pub fn build_query(&self, thresholds: &Thresholds) -> ProviderQuery {
        let (endpoint, sort_by, direction) = self.definition.kind.default_sort();
        ProviderQuery {
            endpoint,
            sort_by: self.definition.sort_by.unwrap_or(sort_by),
            direction: self.definition.direction.unwrap_or(direction),
            page_size: self.definition.page_size,
            filters: QueryFilters {
                min_liquidity_usd: thresholds.min_liquidity_usd,
                min_market_cap: thresholds.min_market_cap,
                min_holders: thresholds.min_holders,
                min_volume_24h: thresholds.min_volume_24h,
            },
        }
    }

    /// Run with the strategy's own strict thresholds and deadline
    pub async fn execute(&self, provider: &dyn MarketDataProvider) -> Vec<Candidate> {
        let thresholds = self.definition.thresholds;
        self.execute_with(provider, &thresholds, self.deadline()).await
    }

    /// Run with explicit thresholds and deadline
    pub async fn execute_with(
        &self,
        provider: &dyn MarketDataProvider,
        thresholds: &Thresholds,
        deadline: Duration,
    ) -> Vec<Candidate> {
        let now = Utc::now();
        let query = self.build_query(thresholds);

        let fetched = match tokio::time::timeout(deadline, provider.query(&query)).await {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => {
                warn!(
                    strategy = %self.name(),
                    provider = %provider.name(),
                    error = %e,
                    "Provider query failed"
                );
                Vec::new()
            }
            Err(_) => {
                let e = Error::ProviderTimeout(deadline.as_millis() as u64);
                warn!(
                    strategy = %self.name(),
                    provider = %provider.name(),
                    error = %e,
                    "Provider query failed"
                );
                Vec::new()
            }
        };

        let fetched_count = fetched.len();
        let tokens = self.deps.denylist.retain_non_major(fetched);
        let candidates = self.process_results(tokens, deadline, now).await;

        info!(
            strategy = %self.name(),
            fetched = fetched_count,
            candidates = candidates.len(),
            "Strategy run complete"
        );
        candidates
    }

    /// Security classification, appearance tracking, risk filters
    ///
    /// Always records the execution time and persists the ledger, even
    /// when nothing survives.
    pub async fn process_results(
        &self,
        tokens: Vec<TokenSnapshot>,
        deadline: Duration,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let classified = self.definition.security_filter && self.deps.classifier.is_some();
        let tokens = if classified {
            self.filter_secure(tokens, deadline).await
        } else {
            tokens
        };

        let mut ledger = self.ledger.lock().await;
        ledger.set_last_execution_time(now);
        ledger.prune_stale(self.ledger_config.max_age_days, now);

        if tokens.is_empty() {
            ledger.persist().await;
            return Vec::new();
        }

        let records = ledger.record_batch(&tokens, now).await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !seen.insert(token.address.clone()) {
                continue;
            }
            let record = records.get(&token.address);

            if let Err(rejection) = self.check_risk(&token, record) {
                debug!(
                    strategy = %self.name(),
                    token = %token.address,
                    symbol = %token.symbol,
                    reason = %rejection,
                    "Risk filter rejected token"
                );
                continue;
            }

            let (consecutive, promising) = record
                .map(|r| (r.consecutive_appearances, ledger.is_promising(r)))
                .unwrap_or((1, false));

            candidates.push(Candidate {
                snapshot: token,
                strategy: self.definition.name.clone(),
                tier: 0,
                consecutive_appearances: consecutive,
                promising,
                momentum_score: 0.0,
                recent_listing: false,
                // Only healthy tokens survive classification
                security: classified.then_some(Classification::Healthy),
            });
        }

        candidates
    }

    /// Apply this kind's risk filters in order
    pub fn check_risk(
        &self,
        token: &TokenSnapshot,
        record: Option<&AppearanceRecord>,
    ) -> std::result::Result<(), RiskRejection> {
        for filter in self.definition.kind.risk_filters() {
            self.definition.risk.check(*filter, token, record)?;
        }
        Ok(())
    }

    /// Drop tokens the classifier does not mark healthy.
    /// Batches run concurrently; a failed batch drops its tokens.
    async fn filter_secure(&self, tokens: Vec<TokenSnapshot>, deadline: Duration) -> Vec<TokenSnapshot> {
        let Some(classifier) = self.deps.classifier.as_ref() else {
            return tokens;
        };
        if tokens.is_empty() {
            return tokens;
        }

        let batch_size = self.deps.classifier_batch_size.max(1);
        let addresses: Vec<String> = tokens.iter().map(|t| t.address.clone()).collect();
        let batches = addresses.chunks(batch_size).map(|chunk| async move {
            match tokio::time::timeout(deadline, classifier.classify_batch(chunk)).await {
                Ok(Ok(map)) => map,
                Ok(Err(e)) => {
                    warn!(strategy = %self.name(), error = %e, batch = chunk.len(), "Security classification failed");
                    HashMap::new()
                }
                Err(_) => {
                    let e = Error::Classifier(format!("timed out after {}ms", deadline.as_millis()));
                    warn!(strategy = %self.name(), error = %e, batch = chunk.len(), "Security classification failed");
                    HashMap::new()
                }
            }
        });

        let mut classifications = HashMap::with_capacity(addresses.len());
        for map in join_all(batches).await {
            classifications.extend(map);
        }

        let before = tokens.len();
        let healthy = classifier.filter_healthy(tokens, &classifications);
        if healthy.len() < before {
            debug!(
                strategy = %self.name(),
                dropped = before - healthy.len(),
                "Dropped tokens failing security classification"
            );
        }
        healthy
    }

    /// Tokens meeting the minimum consecutive appearances
    pub async fn promising_tokens(&self) -> HashSet<String> {
        self.ledger.lock().await.promising_tokens()
    }

    pub async fn last_execution_time(&self) -> Option<DateTime<Utc>> {
        self.ledger.lock().await.last_execution_time()
    }

    /// Copy of every appearance record, most recently seen first
    pub async fn appearance_records(&self) -> Vec<AppearanceRecord> {
        let ledger = self.ledger.lock().await;
        let mut records: Vec<_> = ledger.records().cloned().collect();
        records.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        records
    }

    /// Prune stale records now and persist
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        self.ledger
            .lock()
            .await
            .prune(self.ledger_config.max_age_days, now)
            .await
    }
}
