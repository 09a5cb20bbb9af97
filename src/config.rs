//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::alert::AlertConfig;
use crate::discovery::{
    DexScreenerConfig, DiscoveryConfig, LedgerConfig, RelaxationConfig, RugCheckConfig,
    StrategyDefinition,
};
use crate::phase::PhaseConfig;
use crate::scoring::ScoreWeights;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub relaxation: RelaxationConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Tiers in execution order
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyDefinition>,
    #[serde(default)]
    pub scoring: ScoreWeights,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub dexscreener: DexScreenerConfig,
    /// Security classifier used by strategies and the alert gate
    #[serde(default)]
    pub rugcheck: RugCheckConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub denylist: DenylistConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding ledgers, dedup cache, blocklist and alert records
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Log every accepted alert
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Give up retrying a webhook after this long
    #[serde(default = "default_webhook_max_elapsed_secs")]
    pub webhook_max_elapsed_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log: true,
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            webhook_max_elapsed_secs: default_webhook_max_elapsed_secs(),
        }
    }
}

/// Extra majors on top of the built-in denylist
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DenylistConfig {
    #[serde(default)]
    pub extra_addresses: Vec<String>,
    #[serde(default)]
    pub extra_symbol_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_interval_secs() -> u64 {
    300
}

fn default_strategies() -> Vec<StrategyDefinition> {
    StrategyDefinition::standard_tiers()
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_webhook_max_elapsed_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RADAR_)
            .add_source(
                config::Environment::with_prefix("RADAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.interval_secs == 0 {
            anyhow::bail!("scan.interval_secs must be positive");
        }

        self.discovery.validate().context("Invalid [discovery] section")?;
        self.relaxation.validate().context("Invalid [relaxation] section")?;
        self.ledger.validate().context("Invalid [ledger] section")?;
        self.scoring.validate().context("Invalid [scoring] section")?;
        self.phase.validate().context("Invalid [phase] section")?;
        self.alerts.validate().context("Invalid [alerts] section")?;

        // Tiers
        if self.strategies.is_empty() {
            anyhow::bail!("At least one strategy is required");
        }
        let mut names = HashSet::new();
        for strategy in &self.strategies {
            strategy
                .validate()
                .with_context(|| format!("Invalid strategy '{}'", strategy.name))?;
            if !names.insert(strategy.name.as_str()) {
                anyhow::bail!("Duplicate strategy name: {}", strategy.name);
            }
        }

        // Validate denylist patterns (compile regex to check)
        for pattern in &self.denylist.extra_symbol_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid extra_symbol_pattern regex: {}", pattern))?;
        }

        // Validate endpoints
        url::Url::parse(&self.dexscreener.base_url)
            .with_context(|| format!("Invalid dexscreener.base_url: {}", self.dexscreener.base_url))?;
        if self.dexscreener.timeout_secs == 0 {
            anyhow::bail!("dexscreener.timeout_secs must be positive");
        }
        if self.rugcheck.enabled {
            self.rugcheck.validate().context("Invalid [rugcheck] section")?;
            url::Url::parse(&self.rugcheck.base_url)
                .with_context(|| format!("Invalid rugcheck.base_url: {}", self.rugcheck.base_url))?;
        }

        if let Some(webhook) = &self.notifications.webhook_url {
            let url = url::Url::parse(webhook).context("Invalid notifications.webhook_url")?;
            if url.scheme() != "https" && url.scheme() != "http" {
                anyhow::bail!("webhook_url must be http(s), got {}", url.scheme());
            }
        }

        if !self.notifications.log && self.notifications.webhook_url.is_none() {
            tracing::warn!("No notification sink enabled - accepted alerts will only be counted");
        }

        Ok(())
    }

    /// Webhook URL, parsed
    pub fn webhook_url(&self) -> Result<Option<url::Url>> {
        self.notifications
            .webhook_url
            .as_deref()
            .map(|u| url::Url::parse(u).context("Invalid notifications.webhook_url"))
            .transpose()
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let strategies: Vec<String> = self
            .strategies
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "    tier {}: {} ({:?}, min_consecutive={}, page_size={}, deadline={}ms)",
                    i, s.name, s.kind, s.min_consecutive_appearances, s.page_size, s.deadline_ms
                )
            })
            .collect();

        format!(
            r#"Configuration:
  Storage:
    data_dir: {}
  Scan:
    interval: {}s
  Discovery:
    requested_count: {}
    min_yield_fraction: {}
    dedup_ttl: {}min
  Relaxation:
    factors: {} / {}
    score_decrements: {} / {}
    recent_listing_easing: {} (within {}h)
    max_level: {}
  Ledger:
    consecutive_window: {}h
    max_history: {}
    max_age: {}d
  Strategies:
{}
  Alerts:
    cooldown: {}min
    min_score: {}
    min_liquidity: ${}
    max_volume_to_mcap: {}x
    risky_score_threshold: {}
    max_drops: -{}% 1h / -{}% 4h / -{}% 24h
  DexScreener:
    base_url: {}
    chain: {}
  RugCheck:
    enabled: {}
    risky_score: {}
  Notifications:
    log: {}
    webhook: {}
"#,
            self.storage.data_dir.display(),
            self.scan.interval_secs,
            self.discovery.requested_count,
            self.discovery.min_yield_fraction,
            self.discovery.dedup_ttl_minutes,
            self.relaxation.relaxed_factor,
            self.relaxation.very_relaxed_factor,
            self.relaxation.relaxed_score_decrement,
            self.relaxation.very_relaxed_score_decrement,
            self.relaxation.recent_listing_score_easing,
            self.relaxation.recent_listing_hours,
            self.relaxation.max_level,
            self.ledger.consecutive_window_hours,
            self.ledger.max_history,
            self.ledger.max_age_days,
            strategies.join("\n"),
            self.alerts.cooldown_minutes,
            self.alerts.min_alert_score,
            self.alerts.min_liquidity_usd,
            self.alerts.max_volume_to_mcap_ratio,
            self.alerts.risky_score_threshold,
            self.alerts.max_drop_1h_pct,
            self.alerts.max_drop_4h_pct,
            self.alerts.max_drop_24h_pct,
            mask_url(&self.dexscreener.base_url),
            self.dexscreener.chain_id,
            self.rugcheck.enabled,
            self.rugcheck.risky_score,
            self.notifications.log,
            self.notifications
                .webhook_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(not set)".to_string()),
        )
    }
}

/// Mask URL for display (hide tokens in paths and query params)
fn mask_url(url: &str) -> String {
    let base = url.split('?').next().unwrap_or(url);
    let masked = match url::Url::parse(base) {
        // Webhook URLs carry their secret in the path
        Ok(parsed) if parsed.path().len() > 1 => {
            format!("{}://{}/***", parsed.scheme(), parsed.host_str().unwrap_or(""))
        }
        _ => base.to_string(),
    };
    if url.contains('?') {
        format!("{}?***", masked)
    } else {
        masked
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            scan: ScanConfig::default(),
            discovery: DiscoveryConfig::default(),
            relaxation: RelaxationConfig::default(),
            ledger: LedgerConfig::default(),
            strategies: default_strategies(),
            scoring: ScoreWeights::default(),
            phase: PhaseConfig::default(),
            alerts: AlertConfig::default(),
            dexscreener: DexScreenerConfig::default(),
            rugcheck: RugCheckConfig::default(),
            notifications: NotificationConfig::default(),
            denylist: DenylistConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
