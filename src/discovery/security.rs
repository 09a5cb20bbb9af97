//! Security classification collaborator
//!
//! Batch risk classification is provided by an external service; the
//! discovery core only consumes its verdicts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::TokenSnapshot;

/// Verdict for one token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Healthy,
    Risky,
    Scam,
}

impl Classification {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Classification::Healthy)
    }
}

/// Batch security classifier
#[async_trait]
pub trait SecurityClassifier: Send + Sync {
    /// Classify a batch of token addresses
    async fn classify_batch(&self, addresses: &[String]) -> Result<HashMap<String, Classification>>;

    /// Keep only tokens classified healthy. Tokens missing from the
    /// classification map are treated as unhealthy.
    fn filter_healthy(
        &self,
        tokens: Vec<TokenSnapshot>,
        classifications: &HashMap<String, Classification>,
    ) -> Vec<TokenSnapshot> {
        tokens
            .into_iter()
            .filter(|t| {
                classifications
                    .get(&t.address)
                    .map(Classification::is_healthy)
                    .unwrap_or(false)
            })
            .collect()
    }
}
