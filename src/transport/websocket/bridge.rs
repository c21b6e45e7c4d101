//! コレクター・アラートマネージャーからリレーへの転送
//!
//! 購読コールバックは同期なので、チャネル経由で非同期のブロードキャストに渡します。

use super::protocol::RelayMessage;
use super::server::MetricsRelay;
use crate::monitoring::{AlertManager, MetricsCollector, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 転送の購読と転送タスク
pub struct RelayBridge {
    subscriptions: Vec<Subscription>,
    task: JoinHandle<()>,
}

impl RelayBridge {
    /// 記録されたメトリクスと発行されたアラートをリレーへ転送する
    pub fn attach(
        relay: Arc<MetricsRelay>,
        collector: &MetricsCollector,
        alerts: &AlertManager,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayMessage>();

        let metric_tx = tx.clone();
        let metrics = collector.subscribe(move |record| {
            let _ = metric_tx.send(RelayMessage::Metric(record.to_update()));
        });
        let alert_sub = alerts.subscribe(move |alert| {
            let _ = tx.send(RelayMessage::Alert(alert.clone()));
        });

        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = match &message {
                    RelayMessage::Metric(update) => relay.broadcast(update).await,
                    RelayMessage::Alert(alert) => relay.broadcast_alert(alert).await,
                    RelayMessage::Connected => continue,
                };
                match result {
                    Ok(sent) => debug!("Forwarded to {} clients", sent),
                    Err(e) => warn!("Failed to forward to relay: {}", e),
                }
            }
        });

        Self {
            subscriptions: vec![metrics, alert_sub],
            task,
        }
    }

    /// 購読を解除して転送を停止
    pub fn detach(self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.task.abort();
    }
}
