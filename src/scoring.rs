//! Momentum scoring
//!
//! Maps a token snapshot to a 0..=100 momentum/quality score. Each
//! component is normalized to [-1, 1] against a configured cap, weighted,
//! and the weighted mean is shifted so that 50 means "neutral".

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::TokenSnapshot;

/// Component weights and normalization caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_price_h1_weight")]
    pub price_h1: f64,
    #[serde(default = "default_price_h24_weight")]
    pub price_h24: f64,
    #[serde(default = "default_buy_pressure_weight")]
    pub buy_pressure: f64,
    #[serde(default = "default_turnover_weight")]
    pub turnover: f64,
    #[serde(default = "default_volume_change_weight")]
    pub volume_change: f64,

    /// 1h gain (%) that saturates the price component
    #[serde(default = "default_price_h1_cap")]
    pub price_h1_cap_pct: f64,
    /// 24h gain (%) that saturates the trend component
    #[serde(default = "default_price_h24_cap")]
    pub price_h24_cap_pct: f64,
    /// Buy/sell ratio that saturates buy pressure
    #[serde(default = "default_buy_ratio_cap")]
    pub buy_ratio_cap: f64,
    /// 24h volume / liquidity that saturates turnover
    #[serde(default = "default_turnover_cap")]
    pub turnover_cap: f64,
    /// 1h volume change (%) that saturates the volume component
    #[serde(default = "default_volume_change_cap")]
    pub volume_change_cap_pct: f64,
}

fn default_price_h1_weight() -> f64 { 1.5 }
fn default_price_h24_weight() -> f64 { 1.0 }
fn default_buy_pressure_weight() -> f64 { 1.2 }
fn default_turnover_weight() -> f64 { 0.8 }
fn default_volume_change_weight() -> f64 { 1.0 }
fn default_price_h1_cap() -> f64 { 30.0 }
fn default_price_h24_cap() -> f64 { 100.0 }
fn default_buy_ratio_cap() -> f64 { 3.0 }
fn default_turnover_cap() -> f64 { 5.0 }
fn default_volume_change_cap() -> f64 { 200.0 }

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price_h1: default_price_h1_weight(),
            price_h24: default_price_h24_weight(),
            buy_pressure: default_buy_pressure_weight(),
            turnover: default_turnover_weight(),
            volume_change: default_volume_change_weight(),
            price_h1_cap_pct: default_price_h1_cap(),
            price_h24_cap_pct: default_price_h24_cap(),
            buy_ratio_cap: default_buy_ratio_cap(),
            turnover_cap: default_turnover_cap(),
            volume_change_cap_pct: default_volume_change_cap(),
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            self.price_h1,
            self.price_h24,
            self.buy_pressure,
            self.turnover,
            self.volume_change,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(Error::Config("score weights cannot be negative".to_string()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Config("at least one score weight must be positive".to_string()));
        }

        let caps = [
            self.price_h1_cap_pct,
            self.price_h24_cap_pct,
            self.turnover_cap,
            self.volume_change_cap_pct,
        ];
        if caps.iter().any(|c| *c <= 0.0) || self.buy_ratio_cap <= 1.0 {
            return Err(Error::Config(
                "score caps must be positive (buy_ratio_cap > 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-component breakdown, useful for logging
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub price_h1: f64,
    pub price_h24: f64,
    pub buy_pressure: f64,
    pub turnover: f64,
    pub volume_change: f64,
    pub score: f64,
}

/// Pure momentum scorer
#[derive(Debug, Clone, Default)]
pub struct MomentumScorer {
    weights: ScoreWeights,
}

impl MomentumScorer {
    pub fn new(weights: ScoreWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    /// Score a snapshot, 0..=100
    pub fn score(&self, token: &TokenSnapshot) -> f64 {
        self.breakdown(token).score
    }

    /// Score with component values
    pub fn breakdown(&self, token: &TokenSnapshot) -> ScoreBreakdown {
        let w = &self.weights;

        let price_h1 = normalize(token.price_change.h1.unwrap_or(0.0), w.price_h1_cap_pct);
        let price_h24 = normalize(token.price_change.h24.unwrap_or(0.0), w.price_h24_cap_pct);

        // Ratio 1.0 is neutral; below 1 is sell pressure
        let buy_pressure = if token.txns.h1.total() == 0 {
            0.0
        } else {
            let ratio = token.txns.h1.buy_sell_ratio().min(w.buy_ratio_cap);
            if ratio >= 1.0 {
                (ratio - 1.0) / (w.buy_ratio_cap - 1.0)
            } else {
                ratio - 1.0
            }
        };

        let turnover = if token.liquidity_usd > 0.0 {
            normalize(token.volume.h24 / token.liquidity_usd, w.turnover_cap).max(0.0)
        } else {
            0.0
        };

        let volume_change = normalize(token.volume_change_h1.unwrap_or(0.0), w.volume_change_cap_pct);

        let total_weight = w.price_h1 + w.price_h24 + w.buy_pressure + w.turnover + w.volume_change;
        let weighted = price_h1 * w.price_h1
            + price_h24 * w.price_h24
            + buy_pressure * w.buy_pressure
            + turnover * w.turnover
            + volume_change * w.volume_change;

        let mean = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };

        ScoreBreakdown {
            price_h1,
            price_h24,
            buy_pressure,
            turnover,
            volume_change,
            score: (50.0 + 50.0 * mean).clamp(0.0, 100.0),
        }
    }
}

fn normalize(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / cap).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeCount;

    #[test]
    fn test_neutral_snapshot_scores_fifty() {
        let scorer = MomentumScorer::default();
        let token = TokenSnapshot::new("n", "N");
        assert_eq!(scorer.score(&token), 50.0);
    }

    #[test]
    fn test_saturated_momentum_scores_hundred() {
        let scorer = MomentumScorer::default();
        let mut token = TokenSnapshot::new("m", "M");
        token.price_change.h1 = Some(80.0);
        token.price_change.h24 = Some(400.0);
        token.txns.h1 = TradeCount::new(90, 10);
        token.liquidity_usd = 100_000.0;
        token.volume.h24 = 1_000_000.0;
        token.volume_change_h1 = Some(500.0);

        assert_eq!(scorer.score(&token), 100.0);
    }

    #[test]
    fn test_dumping_token_scores_low() {
        let scorer = MomentumScorer::default();
        let mut token = TokenSnapshot::new("d", "D");
        token.price_change.h1 = Some(-40.0);
        token.price_change.h24 = Some(-60.0);
        token.txns.h1 = TradeCount::new(5, 50);
        token.volume_change_h1 = Some(-90.0);

        let score = scorer.score(&token);
        assert!(score < 20.0, "score was {}", score);
    }

    #[test]
    fn test_invalid_weights() {
        let weights = ScoreWeights {
            price_h1: -1.0,
            ..Default::default()
        };
        assert!(MomentumScorer::new(weights).is_err());

        let weights = ScoreWeights {
            buy_ratio_cap: 1.0,
            ..Default::default()
        };
        assert!(MomentumScorer::new(weights).is_err());
    }
}
