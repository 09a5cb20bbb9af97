//! Market phase classifier
//!
//! Tags a token's recent price trajectory as a pump or dump phase, with a
//! risk level and an opportunity signal for extreme pumps. The alert
//! validator uses the tags to stay pump-friendly and dump-averse.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::TokenSnapshot;

/// Trajectory classification (mutually exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    EarlyPump,
    MomentumPump,
    ExtremePump,
    DumpStart,
    DumpContinuation,
    Crash,
    Normal,
}

impl MarketPhase {
    pub fn is_dump(&self) -> bool {
        matches!(
            self,
            MarketPhase::DumpStart | MarketPhase::DumpContinuation | MarketPhase::Crash
        )
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketPhase::EarlyPump => "early_pump",
            MarketPhase::MomentumPump => "momentum_pump",
            MarketPhase::ExtremePump => "extreme_pump",
            MarketPhase::DumpStart => "dump_start",
            MarketPhase::DumpContinuation => "dump_continuation",
            MarketPhase::Crash => "crash",
            MarketPhase::Normal => "normal",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Price-change cut-offs (percent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    #[serde(default = "default_early_pump_h1")]
    pub early_pump_h1: f64,
    #[serde(default = "default_momentum_pump_h1")]
    pub momentum_pump_h1: f64,
    #[serde(default = "default_extreme_pump_h1")]
    pub extreme_pump_h1: f64,
    #[serde(default = "default_extreme_pump_h24")]
    pub extreme_pump_h24: f64,
    /// 5m drop that turns any pump into a dump start
    #[serde(default = "default_reversal_m5")]
    pub reversal_m5: f64,
    #[serde(default = "default_dump_h1")]
    pub dump_h1: f64,
    #[serde(default = "default_dump_continuation_h24")]
    pub dump_continuation_h24: f64,
    #[serde(default = "default_crash_h1")]
    pub crash_h1: f64,
    #[serde(default = "default_crash_h24")]
    pub crash_h24: f64,
    #[serde(default = "default_critical_h1")]
    pub critical_h1: f64,
    #[serde(default = "default_critical_h24")]
    pub critical_h24: f64,
    /// 1h buy/sell ratio an extreme pump needs to count as an opportunity
    #[serde(default = "default_opportunity_buy_ratio")]
    pub opportunity_min_buy_ratio: f64,
    /// 24h volume / liquidity an extreme pump needs to count as an opportunity
    #[serde(default = "default_opportunity_turnover")]
    pub opportunity_min_turnover: f64,
}

fn default_early_pump_h1() -> f64 {
    5.0
}
fn default_momentum_pump_h1() -> f64 {
    15.0
}
fn default_extreme_pump_h1() -> f64 {
    50.0
}
fn default_extreme_pump_h24() -> f64 {
    300.0
}
fn default_reversal_m5() -> f64 {
    -10.0
}
fn default_dump_h1() -> f64 {
    -10.0
}
fn default_dump_continuation_h24() -> f64 {
    -20.0
}
fn default_crash_h1() -> f64 {
    -30.0
}
fn default_crash_h24() -> f64 {
    -50.0
}
fn default_critical_h1() -> f64 {
    -60.0
}
fn default_critical_h24() -> f64 {
    -90.0
}
fn default_opportunity_buy_ratio() -> f64 {
    1.5
}
fn default_opportunity_turnover() -> f64 {
    1.0
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            early_pump_h1: default_early_pump_h1(),
            momentum_pump_h1: default_momentum_pump_h1(),
            extreme_pump_h1: default_extreme_pump_h1(),
            extreme_pump_h24: default_extreme_pump_h24(),
            reversal_m5: default_reversal_m5(),
            dump_h1: default_dump_h1(),
            dump_continuation_h24: default_dump_continuation_h24(),
            crash_h1: default_crash_h1(),
            crash_h24: default_crash_h24(),
            critical_h1: default_critical_h1(),
            critical_h24: default_critical_h24(),
            opportunity_min_buy_ratio: default_opportunity_buy_ratio(),
            opportunity_min_turnover: default_opportunity_turnover(),
        }
    }
}

impl PhaseConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0 <= self.early_pump_h1
            && self.early_pump_h1 <= self.momentum_pump_h1
            && self.momentum_pump_h1 <= self.extreme_pump_h1)
        {
            return Err(Error::Config(
                "pump cut-offs must satisfy 0 <= early <= momentum <= extreme".to_string(),
            ));
        }
        if !(self.critical_h1 <= self.crash_h1 && self.crash_h1 <= self.dump_h1 && self.dump_h1 <= 0.0)
        {
            return Err(Error::Config(
                "dump cut-offs must satisfy critical <= crash <= dump <= 0".to_string(),
            ));
        }
        if self.critical_h24 > self.crash_h24 || self.reversal_m5 > 0.0 {
            return Err(Error::Config(
                "critical_h24 must be <= crash_h24 and reversal_m5 <= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAssessment {
    pub phase: MarketPhase,
    pub risk: RiskLevel,
    pub has_opportunity: bool,
    pub reasons: Vec<String>,
}

/// Pure phase classifier
#[derive(Debug, Clone, Default)]
pub struct PhaseClassifier {
    config: PhaseConfig,
}

impl PhaseClassifier {
    pub fn new(config: PhaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn classify(&self, token: &TokenSnapshot) -> PhaseAssessment {
        let c = &self.config;
        let m5 = token.price_change.m5.unwrap_or(0.0);
        let h1 = token.price_change.h1.unwrap_or(0.0);
        let h24 = token.price_change.h24.unwrap_or(0.0);
        let mut reasons = vec![];

        let phase = if h1 <= c.crash_h1 || h24 <= c.crash_h24 {
            reasons.push(format!("Crash: 1h {:+.1}%, 24h {:+.1}%", h1, h24));
            MarketPhase::Crash
        } else if h1 <= c.dump_h1 {
            if h24 <= c.dump_continuation_h24 {
                reasons.push(format!("Dump continuing: 1h {:+.1}%, 24h {:+.1}%", h1, h24));
                MarketPhase::DumpContinuation
            } else {
                reasons.push(format!("Dump starting: 1h {:+.1}%", h1));
                MarketPhase::DumpStart
            }
        } else if h1 >= c.early_pump_h1 && m5 <= c.reversal_m5 {
            reasons.push(format!("Pump reversing: 5m {:+.1}% after 1h {:+.1}%", m5, h1));
            MarketPhase::DumpStart
        } else if h1 >= c.extreme_pump_h1 || h24 >= c.extreme_pump_h24 {
            reasons.push(format!("Extreme pump: 1h {:+.1}%, 24h {:+.1}%", h1, h24));
            MarketPhase::ExtremePump
        } else if h1 >= c.momentum_pump_h1 {
            reasons.push(format!("Momentum pump: 1h {:+.1}%", h1));
            MarketPhase::MomentumPump
        } else if h1 >= c.early_pump_h1 {
            reasons.push(format!("Early pump: 1h {:+.1}%", h1));
            MarketPhase::EarlyPump
        } else {
            MarketPhase::Normal
        };

        let critical = h1 <= c.critical_h1 || h24 <= c.critical_h24;
        if critical {
            reasons.push("Price collapse consistent with a rug".to_string());
        }

        let risk = if critical {
            RiskLevel::Critical
        } else {
            match phase {
                MarketPhase::Crash | MarketPhase::DumpContinuation | MarketPhase::ExtremePump => {
                    RiskLevel::High
                }
                MarketPhase::DumpStart | MarketPhase::MomentumPump => RiskLevel::Medium,
                MarketPhase::EarlyPump | MarketPhase::Normal => RiskLevel::Low,
            }
        };

        let has_opportunity = phase == MarketPhase::ExtremePump && self.extreme_has_opportunity(token, m5);
        if has_opportunity {
            reasons.push("Extreme pump still backed by buyers and volume".to_string());
        }

        PhaseAssessment {
            phase,
            risk,
            has_opportunity,
            reasons,
        }
    }

    /// Buyers still dominate, volume confirms, and price has not rolled over
    fn extreme_has_opportunity(&self, token: &TokenSnapshot, m5: f64) -> bool {
        let turnover = if token.liquidity_usd > 0.0 {
            token.volume.h24 / token.liquidity_usd
        } else {
            0.0
        };
        m5 >= 0.0
            && token.txns.h1.sells > 0
            && token.txns.h1.buy_sell_ratio() >= self.config.opportunity_min_buy_ratio
            && turnover >= self.config.opportunity_min_turnover
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeCount;

    fn token(m5: f64, h1: f64, h24: f64) -> TokenSnapshot {
        let mut t = TokenSnapshot::new("t", "T");
        t.price_change.m5 = Some(m5);
        t.price_change.h1 = Some(h1);
        t.price_change.h24 = Some(h24);
        t
    }

    #[test]
    fn test_pump_phases() {
        let classifier = PhaseClassifier::default();
        assert_eq!(classifier.classify(&token(1.0, 8.0, 10.0)).phase, MarketPhase::EarlyPump);
        assert_eq!(
            classifier.classify(&token(2.0, 20.0, 40.0)).phase,
            MarketPhase::MomentumPump
        );

        let extreme = classifier.classify(&token(3.0, 80.0, 150.0));
        assert_eq!(extreme.phase, MarketPhase::ExtremePump);
        assert_eq!(extreme.risk, RiskLevel::High);
        assert!(!extreme.has_opportunity);

        assert_eq!(classifier.classify(&token(0.0, 1.0, 2.0)).phase, MarketPhase::Normal);
    }

    #[test]
    fn test_dump_phases() {
        let classifier = PhaseClassifier::default();
        assert_eq!(classifier.classify(&token(-2.0, -15.0, 5.0)).phase, MarketPhase::DumpStart);
        assert_eq!(
            classifier.classify(&token(-2.0, -15.0, -30.0)).phase,
            MarketPhase::DumpContinuation
        );
        assert_eq!(classifier.classify(&token(-5.0, -35.0, -20.0)).phase, MarketPhase::Crash);

        // A pump rolling over in the last 5 minutes
        assert_eq!(classifier.classify(&token(-12.0, 20.0, 30.0)).phase, MarketPhase::DumpStart);
    }

    #[test]
    fn test_rug_is_critical() {
        let classifier = PhaseClassifier::default();
        let rug = classifier.classify(&token(-20.0, -75.0, -80.0));
        assert_eq!(rug.phase, MarketPhase::Crash);
        assert_eq!(rug.risk, RiskLevel::Critical);
    }

    #[test]
    fn test_extreme_pump_opportunity() {
        let classifier = PhaseClassifier::default();
        let mut t = token(4.0, 60.0, 200.0);
        t.txns.h1 = TradeCount::new(300, 100);
        t.liquidity_usd = 200_000.0;
        t.volume.h24 = 600_000.0;

        let assessment = classifier.classify(&t);
        assert_eq!(assessment.phase, MarketPhase::ExtremePump);
        assert!(assessment.has_opportunity);
    }

    #[test]
    fn test_invalid_config() {
        let config = PhaseConfig {
            early_pump_h1: 20.0,
            momentum_pump_h1: 10.0,
            ..Default::default()
        };
        assert!(PhaseClassifier::new(config).is_err());
    }
}
