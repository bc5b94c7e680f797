use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Severity used only for local logging/triage; the sink itself receives a
/// single pre-formatted string regardless of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Closed set of alert shapes this engine ever raises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertType {
    PositionOpened {
        epic: String,
        direction: String,
        size: String,
        entry: String,
    },
    Tp1Partial {
        epic: String,
        pnl: String,
    },
    PositionClosed {
        epic: String,
        reason: String,
        pnl: String,
    },
    BrokerClosedRecovered {
        epic: String,
        deal_id: String,
        pnl: String,
    },
    TrendFlip {
        epic: String,
        mode: String,
    },
    EngineStarted,
    EngineStopped,
    StartupFatal {
        reason: String,
    },
}

impl AlertType {
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertType::StartupFatal { .. } => Severity::Critical,
            AlertType::PositionClosed { .. } | AlertType::BrokerClosedRecovered { .. } => {
                Severity::Warning
            }
            _ => Severity::Info,
        }
    }

    /// Render as the single pre-formatted string the sink contract expects.
    pub fn format(&self) -> String {
        match self {
            AlertType::PositionOpened {
                epic,
                direction,
                size,
                entry,
            } => format!("{epic}: opened {direction} x{size} @ {entry}"),
            AlertType::Tp1Partial { epic, pnl } => format!("{epic}: TP1 partial, pnl={pnl}"),
            AlertType::PositionClosed { epic, reason, pnl } => {
                format!("{epic}: closed ({reason}), pnl={pnl}")
            }
            AlertType::BrokerClosedRecovered { epic, deal_id, pnl } => {
                format!("{epic}: broker-closed {deal_id}, recovered pnl={pnl}")
            }
            AlertType::TrendFlip { epic, mode } => format!("{epic}: trend flip ({mode}), setup cleared"),
            AlertType::EngineStarted => "engine started".to_string(),
            AlertType::EngineStopped => "engine stopped".to_string(),
            AlertType::StartupFatal { reason } => format!("startup failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub alert_type: AlertType,
}

impl Notification {
    pub fn new(alert_type: AlertType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity: alert_type.default_severity(),
            alert_type,
        }
    }
}

/// External notification sink. Accepts a pre-formatted message; failures are
/// non-fatal to the caller (the manager logs and swallows them).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// Posts to a chat webhook. Failures never propagate past `notify`.
pub struct WebhookSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookSink {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build notification http client"),
            webhook_url,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Discards every message. Used when no sink URL is configured, or in tests.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps a short in-memory history (for the `status` CLI command) and
/// forwards every alert to the configured sink. Sink failures are logged and
/// swallowed; the decision path never waits on notification delivery.
pub struct NotificationManager {
    sink: Arc<dyn NotificationSink>,
    recent: Arc<RwLock<Vec<Notification>>>,
    max_recent: usize,
}

impl NotificationManager {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            recent: Arc::new(RwLock::new(Vec::new())),
            max_recent: 200,
        }
    }

    pub async fn notify(&self, alert_type: AlertType) {
        let notification = Notification::new(alert_type);
        let message = notification.alert_type.format();

        match notification.severity {
            Severity::Critical => error!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Info => info!("{}", message),
        }

        if let Err(e) = self.sink.send(&message).await {
            warn!("notification sink failed, message dropped: {}", e);
        }

        let mut recent = self.recent.write().await;
        recent.insert(0, notification);
        if recent.len() > self.max_recent {
            recent.truncate(self.max_recent);
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<Notification> {
        self.recent.read().await.iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn send(&self, _message: &str) -> anyhow::Result<()> {
            anyhow::bail!("sink unreachable")
        }
    }

    #[test]
    fn alert_default_severity() {
        assert_eq!(
            AlertType::StartupFatal { reason: "auth".into() }.default_severity(),
            Severity::Critical
        );
        assert_eq!(AlertType::EngineStarted.default_severity(), Severity::Info);
    }

    #[tokio::test]
    async fn notify_records_history_even_when_sink_fails() {
        let manager = NotificationManager::new(Arc::new(FailingSink));
        manager.notify(AlertType::EngineStarted).await;
        manager
            .notify(AlertType::PositionOpened {
                epic: "EURUSD".into(),
                direction: "BUY".into(),
                size: "1".into(),
                entry: dec!(1.1).to_string(),
            })
            .await;

        let recent = manager.recent(10).await;
        assert_eq!(recent.len(), 2);
    }
}
