//! Alert safety validator
//!
//! Seven ordered stages, first failure wins:
//!
//! 1. Deduplication: symbol alerted within the cooldown
//! 2. Blocklist: identifier permanently blocked
//! 3. Phase: dump phases rejected, critical risk blocklisted, extreme pumps
//!    need an opportunity signal
//! 4. Score floor
//! 5. Market sustainability: liquidity floor, volume/market-cap ceiling
//! 6. Security flags: scams blocklisted, risky tokens need a higher score
//! 7. Health: staged price-drop limits (no ceiling on gains)
//!
//! A rejection is a normal outcome, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::blocklist::Blocklist;
use crate::alert::cooldown::{AlertRecords, DEFAULT_COOLDOWN_MINUTES};
use crate::alert::sink::{AlertPayload, NotificationSink};
use crate::error::{Error, Result};
use crate::phase::{MarketPhase, PhaseAssessment, RiskLevel};
use crate::types::TokenSnapshot;

/// Explicit security flags from upstream checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFlags {
    pub is_scam: bool,
    pub is_risky: bool,
}

/// Everything the validator needs to decide on one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    /// Token address, the blocklist identifier
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    /// Composite score, 0..=100
    pub score: f64,
    pub phase: MarketPhase,
    pub risk: RiskLevel,
    pub has_opportunity: bool,
    pub security: SecurityFlags,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub price_change_h1: Option<f64>,
    pub price_change_h4: Option<f64>,
    pub price_change_h24: Option<f64>,
    pub strategy: Option<String>,
}

impl AlertCandidate {
    pub fn from_snapshot(
        snapshot: &TokenSnapshot,
        score: f64,
        assessment: &PhaseAssessment,
        security: SecurityFlags,
    ) -> Self {
        Self {
            token_address: snapshot.address.clone(),
            symbol: snapshot.symbol.clone(),
            name: snapshot.name.clone(),
            score,
            phase: assessment.phase,
            risk: assessment.risk,
            has_opportunity: assessment.has_opportunity,
            security,
            price_usd: snapshot.price_usd,
            liquidity_usd: snapshot.liquidity_usd,
            volume_24h: snapshot.volume.h24,
            market_cap: snapshot.market_cap,
            price_change_h1: snapshot.price_change.h1,
            price_change_h4: snapshot.price_change.h4,
            price_change_h24: snapshot.price_change.h24,
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    fn to_payload(&self, now: DateTime<Utc>) -> AlertPayload {
        AlertPayload {
            id: Uuid::new_v4(),
            token_address: self.token_address.clone(),
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            score: self.score,
            phase: self.phase,
            risk: self.risk,
            price_usd: self.price_usd,
            liquidity_usd: self.liquidity_usd,
            market_cap: self.market_cap,
            volume_24h: self.volume_24h,
            price_change_h1: self.price_change_h1,
            price_change_h24: self.price_change_h24,
            strategy: self.strategy.clone(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Deduplication = 1,
    Blocklist = 2,
    Phase = 3,
    ScoreFloor = 4,
    Sustainability = 5,
    Security = 6,
    Health = 7,
}

impl ValidationStage {
    pub fn number(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationStage::Deduplication => "deduplication",
            ValidationStage::Blocklist => "blocklist",
            ValidationStage::Phase => "phase",
            ValidationStage::ScoreFloor => "score_floor",
            ValidationStage::Sustainability => "sustainability",
            ValidationStage::Security => "security",
            ValidationStage::Health => "health",
        };
        write!(f, "{}:{}", self.number(), name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub stage: ValidationStage,
    pub reason: String,
    /// The rejection added the token to the blocklist
    pub blocklisted: bool,
}

impl Rejection {
    fn new(stage: ValidationStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            blocklisted: false,
        }
    }

    fn blocking(stage: ValidationStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            blocklisted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AlertDecision {
    Accept,
    Reject(Rejection),
}

impl AlertDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, AlertDecision::Accept)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AlertDecision::Accept => None,
            AlertDecision::Reject(r) => Some(r),
        }
    }
}

/// Validator thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    #[serde(default = "default_min_alert_score")]
    pub min_alert_score: f64,
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity_usd: f64,
    /// 24h volume / market cap ceiling
    #[serde(default = "default_max_volume_to_mcap")]
    pub max_volume_to_mcap_ratio: f64,
    /// Score a risky-flagged token must reach
    #[serde(default = "default_risky_score_threshold")]
    pub risky_score_threshold: f64,
    /// Largest tolerated 1h drop (%)
    #[serde(default = "default_max_drop_1h")]
    pub max_drop_1h_pct: f64,
    #[serde(default = "default_max_drop_4h")]
    pub max_drop_4h_pct: f64,
    #[serde(default = "default_max_drop_24h")]
    pub max_drop_24h_pct: f64,
}

fn default_cooldown_minutes() -> i64 {
    DEFAULT_COOLDOWN_MINUTES
}
fn default_min_alert_score() -> f64 {
    60.0
}
fn default_min_liquidity() -> f64 {
    100_000.0
}
fn default_max_volume_to_mcap() -> f64 {
    100.0
}
fn default_risky_score_threshold() -> f64 {
    75.0
}
fn default_max_drop_1h() -> f64 {
    50.0
}
fn default_max_drop_4h() -> f64 {
    70.0
}
fn default_max_drop_24h() -> f64 {
    80.0
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            min_alert_score: default_min_alert_score(),
            min_liquidity_usd: default_min_liquidity(),
            max_volume_to_mcap_ratio: default_max_volume_to_mcap(),
            risky_score_threshold: default_risky_score_threshold(),
            max_drop_1h_pct: default_max_drop_1h(),
            max_drop_4h_pct: default_max_drop_4h(),
            max_drop_24h_pct: default_max_drop_24h(),
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cooldown_minutes < 0 {
            return Err(Error::Config("cooldown_minutes cannot be negative".to_string()));
        }
        if !(0.0..=100.0).contains(&self.min_alert_score)
            || !(0.0..=100.0).contains(&self.risky_score_threshold)
        {
            return Err(Error::Config(
                "alert score thresholds must be within 0..=100".to_string(),
            ));
        }
        if self.risky_score_threshold < self.min_alert_score {
            return Err(Error::Config(
                "risky_score_threshold must be >= min_alert_score".to_string(),
            ));
        }
        if self.min_liquidity_usd < 0.0 || self.max_volume_to_mcap_ratio <= 0.0 {
            return Err(Error::Config(
                "min_liquidity_usd must be >= 0 and max_volume_to_mcap_ratio > 0".to_string(),
            ));
        }
        for drop in [self.max_drop_1h_pct, self.max_drop_4h_pct, self.max_drop_24h_pct] {
            if !(0.0..=100.0).contains(&drop) {
                return Err(Error::Config(format!(
                    "price drop limits must be within 0..=100, got {}",
                    drop
                )));
            }
        }
        Ok(())
    }
}

/// Gates outbound alerts
pub struct AlertSafetyValidator {
    config: AlertConfig,
    blocklist: Arc<Blocklist>,
    records: AlertRecords,
    // Serializes decide + record so one symbol cannot pass stage 1 twice
    decision_lock: Mutex<()>,
}

impl AlertSafetyValidator {
    pub fn new(config: AlertConfig, blocklist: Arc<Blocklist>, records: AlertRecords) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            blocklist,
            records,
            decision_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    pub fn records(&self) -> &AlertRecords {
        &self.records
    }

    /// Run the stages without writing an alert record.
    /// Critical rejections still blocklist the token.
    pub async fn decide(&self, candidate: &AlertCandidate) -> AlertDecision {
        self.decide_at(candidate, Utc::now()).await
    }

    pub async fn decide_at(&self, candidate: &AlertCandidate, now: DateTime<Utc>) -> AlertDecision {
        match self.evaluate(candidate, now).await {
            Ok(()) => AlertDecision::Accept,
            Err(rejection) => {
                if rejection.blocklisted {
                    self.blocklist
                        .add(
                            &candidate.token_address,
                            format!("stage {}: {}", rejection.stage, rejection.reason),
                        )
                        .await;
                }
                AlertDecision::Reject(rejection)
            }
        }
    }

    async fn evaluate(
        &self,
        c: &AlertCandidate,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), Rejection> {
        // 1. Deduplication
        if let Some(remaining) = self.records.remaining(&c.symbol, now) {
            return Err(Rejection::new(
                ValidationStage::Deduplication,
                format!(
                    "{} alerted recently, cooldown {}s left",
                    c.symbol,
                    remaining.num_seconds()
                ),
            ));
        }

        // 2. Blocklist
        if let Some(entry) = self.blocklist.get(&c.token_address).await {
            return Err(Rejection::new(
                ValidationStage::Blocklist,
                format!("blocklisted: {}", entry.reason),
            ));
        }

        // 3. Phase
        self.check_phase(c)?;

        // 4. Score floor
        if c.score < self.config.min_alert_score {
            return Err(Rejection::new(
                ValidationStage::ScoreFloor,
                format!(
                    "score {:.1} below minimum {:.1}",
                    c.score, self.config.min_alert_score
                ),
            ));
        }

        // 5. Sustainability
        if c.liquidity_usd < self.config.min_liquidity_usd {
            return Err(Rejection::new(
                ValidationStage::Sustainability,
                format!(
                    "liquidity ${:.0} below ${:.0}",
                    c.liquidity_usd, self.config.min_liquidity_usd
                ),
            ));
        }
        if c.market_cap > 0.0 {
            let ratio = c.volume_24h / c.market_cap;
            if ratio > self.config.max_volume_to_mcap_ratio {
                return Err(Rejection::new(
                    ValidationStage::Sustainability,
                    format!(
                        "volume/market cap {:.1}x exceeds {:.1}x",
                        ratio, self.config.max_volume_to_mcap_ratio
                    ),
                ));
            }
        }

        // 6. Security flags
        if c.security.is_scam {
            return Err(Rejection::blocking(ValidationStage::Security, "flagged as scam"));
        }
        if c.security.is_risky && c.score < self.config.risky_score_threshold {
            return Err(Rejection::new(
                ValidationStage::Security,
                format!(
                    "risky token with score {:.1} below {:.1}",
                    c.score, self.config.risky_score_threshold
                ),
            ));
        }

        // 7. Health
        let windows = [
            ("1h", c.price_change_h1, self.config.max_drop_1h_pct),
            ("4h", c.price_change_h4, self.config.max_drop_4h_pct),
            ("24h", c.price_change_h24, self.config.max_drop_24h_pct),
        ];
        for (window, change, max_drop) in windows {
            if let Some(change) = change {
                if change < -max_drop {
                    return Err(Rejection::new(
                        ValidationStage::Health,
                        format!("price {:+.1}% in {} (limit -{:.0}%)", change, window, max_drop),
                    ));
                }
            }
        }

        Ok(())
    }

    fn check_phase(&self, c: &AlertCandidate) -> std::result::Result<(), Rejection> {
        if c.risk == RiskLevel::Critical {
            return Err(Rejection::blocking(
                ValidationStage::Phase,
                format!("critical risk in phase {}", c.phase),
            ));
        }
        match c.phase {
            MarketPhase::EarlyPump | MarketPhase::MomentumPump | MarketPhase::Normal => Ok(()),
            MarketPhase::ExtremePump if c.has_opportunity => Ok(()),
            MarketPhase::ExtremePump => Err(Rejection::new(
                ValidationStage::Phase,
                "extreme pump without trading opportunity",
            )),
            MarketPhase::DumpStart | MarketPhase::DumpContinuation | MarketPhase::Crash => Err(
                Rejection::new(ValidationStage::Phase, format!("dump phase {}", c.phase)),
            ),
        }
    }

    /// Decide, record and forward an alert
    ///
    /// The alert record is written on accept whether or not the sink
    /// delivers.
    pub async fn process(&self, candidate: &AlertCandidate, sink: &dyn NotificationSink) -> AlertDecision {
        let now = Utc::now();
        let decision = {
            let _guard = self.decision_lock.lock().await;
            let decision = self.decide_at(candidate, now).await;
            if decision.is_accept() {
                self.records.record(&candidate.symbol, now).await;
            }
            decision
        };

        match &decision {
            AlertDecision::Accept => {
                info!(
                    token = %candidate.token_address,
                    symbol = %candidate.symbol,
                    score = candidate.score,
                    phase = %candidate.phase,
                    "Alert accepted"
                );
                let payload = candidate.to_payload(now);
                if !sink.send(&payload).await {
                    warn!(
                        alert_id = %payload.id,
                        sink = %sink.name(),
                        symbol = %candidate.symbol,
                        "Alert delivery failed"
                    );
                }
            }
            AlertDecision::Reject(rejection) if rejection.stage == ValidationStage::Deduplication => {
                debug!(
                    symbol = %candidate.symbol,
                    reason = %rejection.reason,
                    "Alert suppressed"
                );
            }
            AlertDecision::Reject(rejection) => {
                info!(
                    token = %candidate.token_address,
                    symbol = %candidate.symbol,
                    stage = %rejection.stage,
                    reason = %rejection.reason,
                    blocklisted = rejection.blocklisted,
                    "Alert rejected"
                );
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::sink::ChannelSink;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use tokio_util::task::TaskTracker;

    struct DeadSink;

    #[async_trait]
    impl NotificationSink for DeadSink {
        fn name(&self) -> &str {
            "dead"
        }

        async fn send(&self, _payload: &AlertPayload) -> bool {
            false
        }
    }

    fn validator() -> AlertSafetyValidator {
        let store = Arc::new(MemoryStore::new());
        let flushes = TaskTracker::new();
        let blocklist = Arc::new(Blocklist::new(store.clone(), flushes.clone()));
        let records = AlertRecords::new(
            chrono::Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
            store,
            flushes,
        );
        AlertSafetyValidator::new(AlertConfig::default(), blocklist, records).unwrap()
    }

    fn candidate(symbol: &str) -> AlertCandidate {
        AlertCandidate {
            token_address: format!("{}-addr", symbol.to_lowercase()),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            score: 80.0,
            phase: MarketPhase::EarlyPump,
            risk: RiskLevel::Low,
            has_opportunity: false,
            security: SecurityFlags::default(),
            price_usd: 0.01,
            liquidity_usd: 250_000.0,
            volume_24h: 500_000.0,
            market_cap: 2_000_000.0,
            price_change_h1: Some(8.0),
            price_change_h4: Some(15.0),
            price_change_h24: Some(30.0),
            strategy: None,
        }
    }

    fn stage(decision: &AlertDecision) -> Option<ValidationStage> {
        decision.rejection().map(|r| r.stage)
    }

    #[tokio::test]
    async fn test_accept_forwards_and_records() {
        let v = validator();
        let (sink, receiver) = ChannelSink::bounded(4);

        let decision = v.process(&candidate("GOOD"), &sink).await;
        assert!(decision.is_accept());
        assert!(v.records().is_cooling_down("GOOD", Utc::now()));

        let payload = receiver.recv().await.unwrap();
        assert_eq!(payload.symbol, "GOOD");
        assert_eq!(payload.phase, MarketPhase::EarlyPump);
    }

    #[tokio::test]
    async fn test_critical_blocklists_then_stage_two() {
        let v = validator();
        let (sink, _rx) = ChannelSink::bounded(4);

        let mut critical = candidate("RUG");
        critical.risk = RiskLevel::Critical;
        let first = v.process(&critical, &sink).await;
        let rejection = first.rejection().unwrap();
        assert_eq!(rejection.stage, ValidationStage::Phase);
        assert!(rejection.blocklisted);
        assert!(v.blocklist().contains("rug-addr").await);

        let mut later = candidate("RUG");
        later.score = 99.0;
        let second = v.process(&later, &sink).await;
        assert_eq!(stage(&second), Some(ValidationStage::Blocklist));
    }

    #[tokio::test]
    async fn test_cooldown_rejects_second_alert() {
        let v = validator();
        let (sink, _rx) = ChannelSink::bounded(4);

        assert!(v.process(&candidate("DUP"), &sink).await.is_accept());

        let mut better = candidate("DUP");
        better.score = 95.0;
        let second = v.process(&better, &sink).await;
        let rejection = second.rejection().unwrap();
        assert_eq!(rejection.stage, ValidationStage::Deduplication);
        assert!(!rejection.blocklisted);
    }

    #[tokio::test]
    async fn test_extreme_pump_needs_opportunity() {
        let v = validator();

        let mut extreme = candidate("MOON");
        extreme.phase = MarketPhase::ExtremePump;
        extreme.risk = RiskLevel::High;
        extreme.score = 40.0;
        let decision = v.decide(&extreme).await;
        let rejection = decision.rejection().unwrap();
        assert_eq!(rejection.stage, ValidationStage::Phase);
        assert!(!rejection.blocklisted);
        assert!(!v.blocklist().contains("moon-addr").await);

        extreme.score = 85.0;
        extreme.has_opportunity = true;
        assert!(v.decide(&extreme).await.is_accept());
    }

    #[tokio::test]
    async fn test_dump_phases_rejected_not_blocklisted() {
        let v = validator();
        for phase in [
            MarketPhase::DumpStart,
            MarketPhase::DumpContinuation,
            MarketPhase::Crash,
        ] {
            let mut c = candidate("DUMP");
            c.phase = phase;
            c.risk = RiskLevel::High;
            let decision = v.decide(&c).await;
            assert_eq!(stage(&decision), Some(ValidationStage::Phase));
            assert!(!decision.rejection().unwrap().blocklisted);
        }
        assert!(v.blocklist().is_empty().await);
    }

    #[tokio::test]
    async fn test_score_floor() {
        let v = validator();
        let mut c = candidate("LOW");
        c.score = 59.9;
        assert_eq!(stage(&v.decide(&c).await), Some(ValidationStage::ScoreFloor));
    }

    #[tokio::test]
    async fn test_low_liquidity_rejected_despite_high_score() {
        let v = validator();
        let mut c = candidate("THIN");
        c.liquidity_usd = 50_000.0;
        c.score = 90.0;
        assert_eq!(stage(&v.decide(&c).await), Some(ValidationStage::Sustainability));
    }

    #[tokio::test]
    async fn test_volume_to_mcap_ceiling() {
        let v = validator();
        let mut c = candidate("WASH");
        c.market_cap = 10_000.0;
        c.volume_24h = 2_000_000.0; // 200x
        assert_eq!(stage(&v.decide(&c).await), Some(ValidationStage::Sustainability));

        // Unknown market cap skips the ratio
        c.market_cap = 0.0;
        assert!(v.decide(&c).await.is_accept());
    }

    #[tokio::test]
    async fn test_security_flags() {
        let v = validator();

        let mut scam = candidate("SCAM");
        scam.security.is_scam = true;
        let decision = v.decide(&scam).await;
        assert_eq!(stage(&decision), Some(ValidationStage::Security));
        assert!(decision.rejection().unwrap().blocklisted);
        assert!(v.blocklist().contains("scam-addr").await);

        let mut risky = candidate("RISKY");
        risky.security.is_risky = true;
        risky.score = 70.0;
        let decision = v.decide(&risky).await;
        assert_eq!(stage(&decision), Some(ValidationStage::Security));
        assert!(!decision.rejection().unwrap().blocklisted);

        risky.score = 80.0;
        assert!(v.decide(&risky).await.is_accept());
    }

    #[tokio::test]
    async fn test_health_drops_and_no_gain_ceiling() {
        let v = validator();

        let mut falling = candidate("FALL");
        falling.price_change_h1 = Some(-55.0);
        assert_eq!(stage(&v.decide(&falling).await), Some(ValidationStage::Health));

        let mut slow_bleed = candidate("BLEED");
        slow_bleed.price_change_h1 = None;
        slow_bleed.price_change_h4 = Some(-10.0);
        slow_bleed.price_change_h24 = Some(-85.0);
        assert_eq!(stage(&v.decide(&slow_bleed).await), Some(ValidationStage::Health));

        let mut rocket = candidate("ROCKET");
        rocket.price_change_h1 = Some(40.0);
        rocket.price_change_h24 = Some(900.0);
        assert!(v.decide(&rocket).await.is_accept());
    }

    #[tokio::test]
    async fn test_rejection_writes_no_record() {
        let v = validator();
        let (sink, _rx) = ChannelSink::bounded(4);

        let mut weak = candidate("RETRY");
        weak.score = 10.0;
        assert!(!v.process(&weak, &sink).await.is_accept());
        assert!(!v.records().is_cooling_down("RETRY", Utc::now()));

        // Improved data on a later cycle may pass
        assert!(v.process(&candidate("RETRY"), &sink).await.is_accept());
    }

    #[tokio::test]
    async fn test_sink_failure_still_records() {
        let v = validator();
        assert!(v.process(&candidate("LOST"), &DeadSink).await.is_accept());
        assert!(v.records().is_cooling_down("LOST", Utc::now()));
    }

    #[tokio::test]
    async fn test_concurrent_alerts_for_one_symbol() {
        let v = validator();
        let (sink, receiver) = ChannelSink::bounded(4);

        let a = candidate("RACE");
        let b = candidate("RACE");
        let (first, second) = tokio::join!(v.process(&a, &sink), v.process(&b, &sink));

        let accepted = [first, second].iter().filter(|d| d.is_accept()).count();
        assert_eq!(accepted, 1);
        assert_eq!(receiver.len(), 1);
    }

    #[test]
    fn test_config_validation() {
        let config = AlertConfig {
            risky_score_threshold: 50.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AlertConfig::default().validate().is_ok());
    }
}
