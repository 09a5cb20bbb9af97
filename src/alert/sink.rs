//! Notification sinks
//!
//! Accepted alerts are handed to a sink as fire-and-forget. The validator
//! only logs a failed send; any retrying happens inside the sink.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::phase::{MarketPhase, RiskLevel};

/// Alert as delivered to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub id: Uuid,
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub score: f64,
    pub phase: MarketPhase,
    pub risk: RiskLevel,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub price_change_h1: Option<f64>,
    pub price_change_h24: Option<f64>,
    /// Strategy that discovered the token, when known
    pub strategy: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outbound alert transport
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver an alert; `false` on failure
    async fn send(&self, payload: &AlertPayload) -> bool;
}

/// Writes alerts to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, payload: &AlertPayload) -> bool {
        info!(
            alert_id = %payload.id,
            token = %payload.token_address,
            symbol = %payload.symbol,
            score = %format!("{:.1}", payload.score),
            phase = %payload.phase,
            liquidity_usd = %format!("{:.0}", payload.liquidity_usd),
            "ALERT"
        );
        true
    }
}

/// POSTs alerts as JSON, retrying transient failures with backoff
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
    max_elapsed: Duration,
}

impl WebhookSink {
    pub fn new(url: Url, timeout: Duration, max_elapsed: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            max_elapsed,
        })
    }

    async fn post_once(&self, payload: &AlertPayload) -> Result<()> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(Error::Sink(format!("webhook returned {}", status)))
        } else {
            Err(Error::Internal(format!("webhook rejected alert: {}", status)))
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, payload: &AlertPayload) -> bool {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            match self.post_once(payload).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(alert_id = %payload.id, error = %e, "Retryable webhook error");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await;

        match result {
            Ok(()) => {
                debug!(alert_id = %payload.id, "Webhook delivered");
                true
            }
            Err(e) => {
                error!(alert_id = %payload.id, error = %e, "Webhook delivery failed");
                false
            }
        }
    }
}

/// Pushes alerts into an in-process channel
pub struct ChannelSink {
    sender: async_channel::Sender<AlertPayload>,
}

impl ChannelSink {
    /// Bounded sink and its receiving end
    pub fn bounded(capacity: usize) -> (Self, async_channel::Receiver<AlertPayload>) {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(&self, payload: &AlertPayload) -> bool {
        // Never wait on a full channel
        match self.sender.try_send(payload.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!(alert_id = %payload.id, error = %e, "Alert channel unavailable");
                false
            }
        }
    }
}

/// Sends to every inner sink; succeeds if any of them did
pub struct MultiSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for MultiSink {
    fn name(&self) -> &str {
        "multi"
    }

    async fn send(&self, payload: &AlertPayload) -> bool {
        let results =
            futures::future::join_all(self.sinks.iter().map(|s| s.send(payload))).await;
        results.into_iter().any(|ok| ok)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn payload(symbol: &str) -> AlertPayload {
        AlertPayload {
            id: Uuid::new_v4(),
            token_address: format!("{}-addr", symbol.to_lowercase()),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            score: 80.0,
            phase: MarketPhase::EarlyPump,
            risk: RiskLevel::Low,
            price_usd: 0.01,
            liquidity_usd: 250_000.0,
            market_cap: 2_000_000.0,
            volume_24h: 500_000.0,
            price_change_h1: Some(8.0),
            price_change_h24: Some(20.0),
            strategy: Some("trending".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_reports_full() {
        let (sink, receiver) = ChannelSink::bounded(1);
        assert!(sink.send(&payload("AAA")).await);
        assert!(!sink.send(&payload("BBB")).await);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.symbol, "AAA");
    }

    #[tokio::test]
    async fn test_multi_sink_any_success() {
        let (channel, receiver) = ChannelSink::bounded(4);
        drop(receiver);
        let multi = MultiSink::new(vec![Box::new(channel), Box::new(LogSink)]);
        assert_eq!(multi.len(), 2);
        assert!(multi.send(&payload("CCC")).await);

        let (closed, receiver) = ChannelSink::bounded(4);
        drop(receiver);
        let only_closed = MultiSink::new(vec![Box::new(closed)]);
        assert!(!only_closed.send(&payload("DDD")).await);
    }

    #[test]
    fn test_payload_serializes_phase_snake_case() {
        let json = serde_json::to_value(payload("EEE")).unwrap();
        assert_eq!(json["phase"], "early_pump");
        assert_eq!(json["risk"], "low");
    }
}
