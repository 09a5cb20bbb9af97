// RugCheck security classifier
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::discovery::security::{Classification, SecurityClassifier};
use crate::error::{Error, Result};

/// RugCheck classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RugCheckConfig {
    /// Off unless explicitly enabled
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent report requests per batch
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Normalised risk score at or above which a token is risky
    #[serde(default = "default_risky_score")]
    pub risky_score: f64,
}

fn default_base_url() -> String {
    "https://api.rugcheck.xyz".to_string()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_concurrent() -> usize {
    4
}
fn default_risky_score() -> f64 {
    50.0
}

impl Default for RugCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            risky_score: default_risky_score(),
        }
    }
}

impl RugCheckConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 || self.max_concurrent == 0 {
            return Err(Error::Config(
                "rugcheck timeout_secs and max_concurrent must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.risky_score) {
            return Err(Error::Config("rugcheck risky_score must be in 0..=100".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReportSummary {
    #[serde(default)]
    score_normalised: Option<f64>,
    #[serde(default)]
    risks: Vec<ReportRisk>,
    #[serde(default)]
    rugged: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReportRisk {
    name: String,
    #[serde(default)]
    level: String,
}

/// Summary report to verdict
fn classify_report(report: &ReportSummary, risky_score: f64) -> Classification {
    if report.rugged.unwrap_or(false) || report.risks.iter().any(|r| r.level == "danger") {
        return Classification::Scam;
    }
    let high_score = report.score_normalised.is_some_and(|s| s >= risky_score);
    if high_score || report.risks.iter().any(|r| r.level == "warn") {
        return Classification::Risky;
    }
    Classification::Healthy
}

/// Classifies tokens from RugCheck summary reports, one request per token
pub struct RugCheckClassifier {
    client: reqwest::Client,
    config: RugCheckConfig,
}

impl RugCheckClassifier {
    pub fn new(config: RugCheckConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch_summary(&self, address: &str) -> Result<ReportSummary> {
        let url = format!(
            "{}/v1/tokens/{}/report/summary",
            self.config.base_url.trim_end_matches('/'),
            address
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Classifier(format!(
                "report for {} returned {}",
                address,
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::Classifier(format!("report for {}: {}", address, e)))
    }
}

#[async_trait]
impl SecurityClassifier for RugCheckClassifier {
    /// Tokens whose report cannot be fetched are left out of the map.
    /// An error means no report in the batch could be fetched.
    async fn classify_batch(&self, addresses: &[String]) -> Result<HashMap<String, Classification>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let results: Vec<(String, Result<ReportSummary>)> = stream::iter(addresses.iter().cloned())
            .map(|address| async move {
                let report = self.fetch_summary(&address).await;
                (address, report)
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;

        let mut classifications = HashMap::with_capacity(results.len());
        let mut last_error = None;
        for (address, report) in results {
            match report {
                Ok(report) => {
                    let verdict = classify_report(&report, self.config.risky_score);
                    if verdict != Classification::Healthy {
                        let risks: Vec<&str> = report.risks.iter().map(|r| r.name.as_str()).collect();
                        debug!(token = %address, verdict = ?verdict, risks = ?risks, "RugCheck verdict");
                    }
                    classifications.insert(address, verdict);
                }
                Err(e) => {
                    warn!(token = %address, error = %e, "RugCheck report unavailable");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if classifications.is_empty() => Err(e),
            _ => Ok(classifications),
        }
    }
}
