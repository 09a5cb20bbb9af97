//! Shared data structures for discovery and alerting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::security::Classification;

/// Price change percentages over rolling windows (e.g. 12.5 = +12.5%)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceChanges {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h4: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

/// Traded volume in USD over rolling windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeWindows {
    pub m5: f64,
    pub h1: f64,
    pub h6: f64,
    pub h24: f64,
}

/// Buy/sell transaction counts for one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCount {
    pub buys: u32,
    pub sells: u32,
}

impl TradeCount {
    pub fn new(buys: u32, sells: u32) -> Self {
        Self { buys, sells }
    }

    pub fn total(&self) -> u64 {
        self.buys as u64 + self.sells as u64
    }

    /// Buys per sell; with no sells the raw buy count is returned
    pub fn buy_sell_ratio(&self) -> f64 {
        if self.sells > 0 {
            self.buys as f64 / self.sells as f64
        } else {
            self.buys as f64
        }
    }
}

/// Transaction counts over rolling windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeWindows {
    pub h1: TradeCount,
    pub h24: TradeCount,
}

/// Provider-neutral view of one token as returned by an upstream source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    /// Token address (unique key)
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub market_cap: f64,
    /// Holder count, when the provider reports it
    #[serde(default)]
    pub holders: Option<u64>,
    #[serde(default)]
    pub volume: VolumeWindows,
    /// Average daily volume over the last 7 days
    #[serde(default)]
    pub volume_7d_avg: Option<f64>,
    /// 1h volume change vs the previous hour, percent
    #[serde(default)]
    pub volume_change_h1: Option<f64>,
    #[serde(default)]
    pub price_change: PriceChanges,
    #[serde(default)]
    pub txns: TradeWindows,
    #[serde(default)]
    pub last_trade_at: Option<DateTime<Utc>>,
    /// When the token (or its main pair) was first listed
    #[serde(default)]
    pub listed_at: Option<DateTime<Utc>>,
}

impl TokenSnapshot {
    /// Create a bare snapshot for a token
    pub fn new(address: impl Into<String>, symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            address: address.into(),
            name: symbol.clone(),
            symbol,
            ..Default::default()
        }
    }

    /// Whether the token was listed within `max_age_hours` of `now`
    pub fn is_recent_listing(&self, now: DateTime<Utc>, max_age_hours: i64) -> bool {
        self.listed_at
            .map(|listed| now - listed <= chrono::Duration::hours(max_age_hours))
            .unwrap_or(false)
    }

    /// 24h volume divided by market cap (None when market cap is unknown)
    pub fn volume_to_mcap(&self) -> Option<f64> {
        if self.market_cap > 0.0 {
            Some(self.volume.h24 / self.market_cap)
        } else {
            None
        }
    }
}

/// A token snapshot that survived at least one discovery tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub snapshot: TokenSnapshot,
    /// Strategy that discovered it
    pub strategy: String,
    /// Tier index the strategy ran at
    pub tier: usize,
    pub consecutive_appearances: u32,
    /// Meets the strategy's minimum consecutive appearances
    pub promising: bool,
    /// Momentum/quality score, 0..=100 (filled by the orchestrator)
    pub momentum_score: f64,
    pub recent_listing: bool,
    /// Security verdict, when the discovering strategy ran the classifier
    #[serde(default)]
    pub security: Option<Classification>,
}

impl Candidate {
    pub fn address(&self) -> &str {
        &self.snapshot.address
    }

    pub fn symbol(&self) -> &str {
        &self.snapshot.symbol
    }
}
