//! Token discovery
//!
//! Strategies query market data providers, track how often tokens keep
//! appearing, and feed a tiered orchestrator that relaxes thresholds when
//! the yield is too low.

pub mod dedup;
pub mod denylist;
pub mod dexscreener;
pub mod ledger;
pub mod orchestrator;
pub mod provider;
pub mod relaxation;
pub mod rugcheck;
pub mod security;
pub mod strategy;

pub use dedup::DedupCache;
pub use denylist::MajorTokenDenylist;
pub use dexscreener::{DexScreenerConfig, DexScreenerProvider};
pub use ledger::{AppearanceLedger, AppearanceRecord, LedgerSettings};
pub use orchestrator::{DiscoveryConfig, DiscoveryOrchestrator, DiscoveryOutcome, Tier, TierReport};
pub use provider::{MarketDataProvider, ProviderQuery, QueryEndpoint, QueryFilters, SortDirection, SortKey};
pub use relaxation::{FilterRelaxationPolicy, RelaxationConfig, RelaxationLevel, Thresholds};
pub use rugcheck::{RugCheckClassifier, RugCheckConfig};
pub use security::{Classification, SecurityClassifier};
pub use strategy::{
    DiscoveryStrategy, LedgerConfig, RiskFilter, RiskParameters, RiskRejection, StrategyDefinition,
    StrategyDeps, StrategyKind,
};
