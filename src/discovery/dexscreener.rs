// DexScreener market data provider
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::discovery::provider::{MarketDataProvider, ProviderQuery, QueryEndpoint};
use crate::error::{Error, Result};
use crate::types::{PriceChanges, TokenSnapshot, TradeCount, TradeWindows, VolumeWindows};

/// Max addresses per token-pairs request
const TOKENS_PER_REQUEST: usize = 30;

/// DexScreener provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexScreenerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between token-pairs requests
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

fn default_base_url() -> String {
    "https://api.dexscreener.com".to_string()
}
fn default_chain_id() -> String {
    "solana".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_request_delay_ms() -> u64 {
    50
}

impl Default for DexScreenerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chain_id: default_chain_id(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TokenListing {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "tokenAddress")]
    token_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PriceChange {
    m5: Option<f64>,
    h1: Option<f64>,
    h6: Option<f64>,
    h24: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Txns {
    m5: Option<TxnCount>,
    h1: Option<TxnCount>,
    h24: Option<TxnCount>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct TxnCount {
    buys: u32,
    sells: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Liquidity {
    usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Volume {
    m5: Option<f64>,
    h1: Option<f64>,
    h6: Option<f64>,
    h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseToken {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DexPair {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "baseToken")]
    base_token: BaseToken,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    #[serde(rename = "priceChange")]
    price_change: Option<PriceChange>,
    txns: Option<Txns>,
    volume: Option<Volume>,
    liquidity: Option<Liquidity>,
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
    fdv: Option<f64>,
    #[serde(rename = "pairCreatedAt")]
    pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenPairsResponse {
    pairs: Option<Vec<DexPair>>,
}

/// `MarketDataProvider` over the public DexScreener API
///
/// DexScreener has no server-side sorting or filtering, so listings are
/// resolved to pairs, filtered and sorted client-side.
pub struct DexScreenerProvider {
    client: reqwest::Client,
    config: DexScreenerConfig,
}

impl DexScreenerProvider {
    pub fn new(config: DexScreenerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Provider(format!("{} returned {}", path, resp.status())));
        }
        Ok(resp.json().await?)
    }

    /// Token addresses from a listing endpoint, in provider order
    async fn listing_addresses(&self, endpoint: QueryEndpoint) -> Result<Vec<String>> {
        let path = match endpoint {
            QueryEndpoint::Listing => "/token-profiles/latest/v1",
            QueryEndpoint::Trending => "/token-boosts/top/v1",
        };
        let listings: Vec<TokenListing> = self.get_json(path).await?;

        let mut seen = HashSet::new();
        Ok(listings
            .into_iter()
            .filter(|l| l.chain_id == self.config.chain_id)
            .filter(|l| seen.insert(l.token_address.clone()))
            .map(|l| l.token_address)
            .collect())
    }

    /// Resolve addresses to their deepest pair
    async fn resolve_pairs(&self, addresses: &[String]) -> Result<HashMap<String, DexPair>> {
        let mut best = HashMap::with_capacity(addresses.len());

        for (i, chunk) in addresses.chunks(TOKENS_PER_REQUEST).enumerate() {
            if i > 0 && self.config.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }
            let path = format!("/latest/dex/tokens/{}", chunk.join(","));
            let response: TokenPairsResponse = self.get_json(&path).await?;

            for pair in response.pairs.unwrap_or_default() {
                if pair.chain_id != self.config.chain_id {
                    continue;
                }
                keep_deepest(&mut best, pair);
            }
        }

        Ok(best)
    }
}

fn keep_deepest(best: &mut HashMap<String, DexPair>, pair: DexPair) {
    let liquidity = pair_liquidity(&pair);
    match best.get(&pair.base_token.address) {
        Some(existing) if pair_liquidity(existing) >= liquidity => {}
        _ => {
            best.insert(pair.base_token.address.clone(), pair);
        }
    }
}

fn pair_liquidity(pair: &DexPair) -> f64 {
    pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
}

fn trade_count(count: Option<&TxnCount>) -> TradeCount {
    count
        .map(|c| TradeCount::new(c.buys, c.sells))
        .unwrap_or_default()
}

/// Convert a pair to a provider-neutral snapshot
fn pair_to_snapshot(pair: &DexPair, now: DateTime<Utc>) -> TokenSnapshot {
    let price_change = pair.price_change.clone().unwrap_or_default();
    let volume = pair.volume.clone().unwrap_or_default();
    let txns = pair.txns.clone().unwrap_or_default();

    let volume = VolumeWindows {
        m5: volume.m5.unwrap_or(0.0),
        h1: volume.h1.unwrap_or(0.0),
        h6: volume.h6.unwrap_or(0.0),
        h24: volume.h24.unwrap_or(0.0),
    };

    // Last hour against the 6h hourly average
    let volume_change_h1 = if volume.h6 > 0.0 {
        let hourly = volume.h6 / 6.0;
        Some((volume.h1 - hourly) / hourly * 100.0)
    } else {
        None
    };

    // DexScreener has no last-trade timestamp; activity in the last
    // 5 minutes is treated as trading now
    let last_trade_at = txns
        .m5
        .filter(|c| c.buys + c.sells > 0)
        .map(|_| now);

    let symbol = pair
        .base_token
        .symbol
        .clone()
        .unwrap_or_else(|| "???".to_string());

    TokenSnapshot {
        address: pair.base_token.address.clone(),
        name: pair
            .base_token
            .name
            .clone()
            .unwrap_or_else(|| symbol.clone()),
        symbol,
        price_usd: pair
            .price_usd
            .as_ref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0),
        liquidity_usd: pair_liquidity(pair),
        market_cap: pair.market_cap.or(pair.fdv).unwrap_or(0.0),
        holders: None,
        volume,
        volume_7d_avg: None,
        volume_change_h1,
        price_change: PriceChanges {
            m5: price_change.m5,
            h1: price_change.h1,
            h4: None,
            h6: price_change.h6,
            h24: price_change.h24,
        },
        txns: TradeWindows {
            h1: trade_count(txns.h1.as_ref()),
            h24: trade_count(txns.h24.as_ref()),
        },
        last_trade_at,
        listed_at: pair
            .pair_created_at
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerProvider {
    fn name(&self) -> &str {
        "dexscreener"
    }

    async fn query(&self, query: &ProviderQuery) -> Result<Vec<TokenSnapshot>> {
        let addresses = self.listing_addresses(query.endpoint).await?;
        debug!(endpoint = ?query.endpoint, listed = addresses.len(), "Fetched DexScreener listing");

        let pairs = self.resolve_pairs(&addresses).await?;
        let now = Utc::now();

        // Keep listing order so ProviderRank means something
        let mut snapshots: Vec<TokenSnapshot> = addresses
            .iter()
            .filter_map(|a| pairs.get(a))
            .map(|p| pair_to_snapshot(p, now))
            .filter(|s| query.filters.matches(s))
            .collect();

        query.sort(&mut snapshots);
        snapshots.truncate(query.page_size);

        info!(
            endpoint = ?query.endpoint,
            sort = ?query.sort_by,
            listed = addresses.len(),
            returned = snapshots.len(),
            "DexScreener query complete"
        );
        Ok(snapshots)
    }
}
