//! Market data provider contract
//!
//! Providers are thin adapters over upstream APIs. The core never sees
//! wire formats, only `TokenSnapshot`s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::Result;
use crate::types::TokenSnapshot;

/// Which upstream listing to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEndpoint {
    /// General token listing, sorted by `sort_by`
    #[default]
    Listing,
    /// Curated "trending" list, provider order
    Trending,
}

/// Sort keys understood by providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    VolumeChange1h,
    LastTradeTime,
    MarketCap,
    Liquidity,
    Volume24h,
    /// Keep the provider's own ordering
    ProviderRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Minimum thresholds sent to the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub min_liquidity_usd: f64,
    pub min_market_cap: f64,
    pub min_holders: u64,
    pub min_volume_24h: f64,
}

impl QueryFilters {
    /// Check a snapshot against the floors (unknown holder counts pass)
    pub fn matches(&self, token: &TokenSnapshot) -> bool {
        token.liquidity_usd >= self.min_liquidity_usd
            && token.market_cap >= self.min_market_cap
            && token.volume.h24 >= self.min_volume_24h
            && token.holders.map_or(true, |h| h >= self.min_holders)
    }
}

/// A single provider request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuery {
    pub endpoint: QueryEndpoint,
    pub sort_by: SortKey,
    pub direction: SortDirection,
    pub page_size: usize,
    pub filters: QueryFilters,
}

impl ProviderQuery {
    /// Sort snapshots client-side for providers without server-side sorting
    pub fn sort(&self, tokens: &mut [TokenSnapshot]) {
        if self.sort_by == SortKey::ProviderRank {
            return;
        }

        tokens.sort_by(|a, b| {
            let ord = match self.sort_by {
                SortKey::VolumeChange1h => cmp_f64(
                    a.volume_change_h1.unwrap_or(f64::MIN),
                    b.volume_change_h1.unwrap_or(f64::MIN),
                ),
                SortKey::LastTradeTime => a.last_trade_at.cmp(&b.last_trade_at),
                SortKey::MarketCap => cmp_f64(a.market_cap, b.market_cap),
                SortKey::Liquidity => cmp_f64(a.liquidity_usd, b.liquidity_usd),
                SortKey::Volume24h => cmp_f64(a.volume.h24, b.volume.h24),
                SortKey::ProviderRank => Ordering::Equal,
            };
            match self.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Upstream market data source
///
/// An `Err` covers both transport failures and an explicit unsuccessful
/// response; malformed payloads map to `Error::MalformedResponse`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Run one query
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<TokenSnapshot>>;
}
