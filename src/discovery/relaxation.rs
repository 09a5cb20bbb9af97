//! Filter relaxation policy
//!
//! Trades strictness for yield when discovery comes up short. Each level
//! scales the numeric floors down and lowers the momentum score floor.
//! Recent listings get an extra, independent easing of the score floor
//! on top of the level-based scaling.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::TokenSnapshot;

/// How permissive thresholds are during one discovery cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxationLevel {
    #[default]
    Strict = 0,
    Relaxed = 1,
    VeryRelaxed = 2,
}

impl RelaxationLevel {
    /// Next level, capped at `max`
    pub fn escalate(self, max: RelaxationLevel) -> RelaxationLevel {
        let next = match self {
            RelaxationLevel::Strict => RelaxationLevel::Relaxed,
            RelaxationLevel::Relaxed | RelaxationLevel::VeryRelaxed => RelaxationLevel::VeryRelaxed,
        };
        next.min(max)
    }
}

impl TryFrom<u8> for RelaxationLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RelaxationLevel::Strict),
            1 => Ok(RelaxationLevel::Relaxed),
            2 => Ok(RelaxationLevel::VeryRelaxed),
            other => Err(Error::UnknownRelaxationLevel(other)),
        }
    }
}

impl fmt::Display for RelaxationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelaxationLevel::Strict => write!(f, "strict"),
            RelaxationLevel::Relaxed => write!(f, "relaxed"),
            RelaxationLevel::VeryRelaxed => write!(f, "very_relaxed"),
        }
    }
}

/// Quality floors a candidate must meet
///
/// Fields left out of a config table keep their `Default` value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_liquidity_usd: f64,
    pub min_market_cap: f64,
    pub min_holders: u64,
    pub min_volume_24h: f64,
    /// Momentum/quality score floor, 0..=100
    pub min_momentum_score: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_liquidity_usd: 50_000.0,
            min_market_cap: 100_000.0,
            min_holders: 100,
            min_volume_24h: 25_000.0,
            min_momentum_score: 40.0,
        }
    }
}

impl Thresholds {
    /// Whether a snapshot with the given momentum score meets every floor.
    /// Unknown holder counts do not fail the holder floor.
    pub fn admits(&self, token: &TokenSnapshot, momentum_score: f64) -> bool {
        token.liquidity_usd >= self.min_liquidity_usd
            && token.market_cap >= self.min_market_cap
            && token.volume.h24 >= self.min_volume_24h
            && token.holders.map_or(true, |h| h >= self.min_holders)
            && momentum_score >= self.min_momentum_score
    }
}

/// Relaxation factors and score decrements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaxationConfig {
    #[serde(default = "default_relaxed_factor")]
    pub relaxed_factor: f64,
    #[serde(default = "default_very_relaxed_factor")]
    pub very_relaxed_factor: f64,
    #[serde(default = "default_relaxed_score_decrement")]
    pub relaxed_score_decrement: f64,
    #[serde(default = "default_very_relaxed_score_decrement")]
    pub very_relaxed_score_decrement: f64,
    /// Extra score-floor easing for recent listings
    #[serde(default = "default_recent_listing_score_easing")]
    pub recent_listing_score_easing: f64,
    /// Listing age that still counts as recent
    #[serde(default = "default_recent_listing_hours")]
    pub recent_listing_hours: i64,
    /// Highest level a cycle may escalate to (0..=2)
    #[serde(default = "default_max_level")]
    pub max_level: u8,
}

fn default_relaxed_factor() -> f64 {
    0.80
}
fn default_very_relaxed_factor() -> f64 {
    0.65
}
fn default_relaxed_score_decrement() -> f64 {
    5.0
}
fn default_very_relaxed_score_decrement() -> f64 {
    10.0
}
fn default_recent_listing_score_easing() -> f64 {
    10.0
}
fn default_recent_listing_hours() -> i64 {
    24
}
fn default_max_level() -> u8 {
    2
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            relaxed_factor: default_relaxed_factor(),
            very_relaxed_factor: default_very_relaxed_factor(),
            relaxed_score_decrement: default_relaxed_score_decrement(),
            very_relaxed_score_decrement: default_very_relaxed_score_decrement(),
            recent_listing_score_easing: default_recent_listing_score_easing(),
            recent_listing_hours: default_recent_listing_hours(),
            max_level: default_max_level(),
        }
    }
}

impl RelaxationConfig {
    /// Reject settings that would make a looser level stricter
    pub fn validate(&self) -> Result<()> {
        RelaxationLevel::try_from(self.max_level)?;

        if !(self.relaxed_factor > 0.0 && self.relaxed_factor <= 1.0) {
            return Err(Error::Config(format!(
                "relaxed_factor must be in (0, 1], got {}",
                self.relaxed_factor
            )));
        }
        if !(self.very_relaxed_factor > 0.0 && self.very_relaxed_factor <= self.relaxed_factor) {
            return Err(Error::Config(format!(
                "very_relaxed_factor must be in (0, relaxed_factor], got {}",
                self.very_relaxed_factor
            )));
        }
        if self.relaxed_score_decrement < 0.0
            || self.very_relaxed_score_decrement < self.relaxed_score_decrement
        {
            return Err(Error::Config(
                "score decrements must satisfy 0 <= relaxed <= very_relaxed".to_string(),
            ));
        }
        if self.recent_listing_score_easing < 0.0 {
            return Err(Error::Config(
                "recent_listing_score_easing cannot be negative".to_string(),
            ));
        }
        if self.recent_listing_hours < 0 {
            return Err(Error::Config(
                "recent_listing_hours cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pure mapping from (level, base thresholds, recency) to effective thresholds
#[derive(Debug, Clone)]
pub struct FilterRelaxationPolicy {
    config: RelaxationConfig,
    max_level: RelaxationLevel,
}

impl FilterRelaxationPolicy {
    /// Build a policy, failing on inconsistent configuration
    pub fn new(config: RelaxationConfig) -> Result<Self> {
        config.validate()?;
        let max_level = RelaxationLevel::try_from(config.max_level)?;
        Ok(Self { config, max_level })
    }

    /// Effective thresholds for a level
    pub fn thresholds(
        &self,
        level: RelaxationLevel,
        base: &Thresholds,
        recent_listing: bool,
    ) -> Thresholds {
        let (factor, decrement) = match level {
            RelaxationLevel::Strict => (1.0, 0.0),
            RelaxationLevel::Relaxed => (
                self.config.relaxed_factor,
                self.config.relaxed_score_decrement,
            ),
            RelaxationLevel::VeryRelaxed => (
                self.config.very_relaxed_factor,
                self.config.very_relaxed_score_decrement,
            ),
        };

        let mut effective = if level == RelaxationLevel::Strict {
            *base
        } else {
            Thresholds {
                min_liquidity_usd: base.min_liquidity_usd * factor,
                min_market_cap: base.min_market_cap * factor,
                min_holders: (base.min_holders as f64 * factor).floor() as u64,
                min_volume_24h: base.min_volume_24h * factor,
                min_momentum_score: (base.min_momentum_score - decrement).max(0.0),
            }
        };

        // Recency easing composes after level scaling
        if recent_listing {
            effective.min_momentum_score =
                (effective.min_momentum_score - self.config.recent_listing_score_easing).max(0.0);
        }

        effective
    }

    /// Highest level cycles may reach
    pub fn max_level(&self) -> RelaxationLevel {
        self.max_level
    }

    /// Listing age (hours) that counts as recent
    pub fn recent_listing_hours(&self) -> i64 {
        self.config.recent_listing_hours
    }
}

impl Default for FilterRelaxationPolicy {
    fn default() -> Self {
        Self {
            config: RelaxationConfig::default(),
            max_level: RelaxationLevel::VeryRelaxed,
        }
    }
}
