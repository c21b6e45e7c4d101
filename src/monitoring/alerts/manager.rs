//! Alert Manager Implementation

use super::alert::{Alert, AlertSeverity};
use super::threshold::AlertThreshold;
use crate::monitoring::aggregate::AggregatedMetrics;
use crate::monitoring::subscription::{panic_message, SubscriberRegistry, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// アラートマネージャー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertManagerConfig {
    /// アラート履歴の保持上限
    pub max_alert_history: usize,
    /// 定期評価の間隔（ミリ秒）
    pub check_interval_ms: u64,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            max_alert_history: 100,
            check_interval_ms: 5000,
        }
    }
}

impl AlertManagerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// アラートマネージャー
///
/// レベルトリガー：条件が真である限り `check_metrics` の呼び出しごとに新しいアラートを発行します。
#[derive(Clone)]
pub struct AlertManager {
    config: AlertManagerConfig,
    /// 登録順の閾値
    thresholds: Arc<RwLock<Vec<AlertThreshold>>>,
    /// 新しい順のアラート履歴
    history: Arc<RwLock<VecDeque<Alert>>>,
    subscribers: SubscriberRegistry<Alert>,
}

impl AlertManager {
    /// 新しいアラートマネージャーを作成
    pub fn new(config: AlertManagerConfig) -> Self {
        Self {
            config,
            thresholds: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            subscribers: SubscriberRegistry::new(),
        }
    }

    pub fn config(&self) -> &AlertManagerConfig {
        &self.config
    }

    /// 閾値を追加（同じIDは置き換え）
    pub async fn add_threshold(&self, threshold: AlertThreshold) {
        let mut thresholds = self.thresholds.write().await;
        match thresholds.iter_mut().find(|t| t.id == threshold.id) {
            Some(existing) => {
                debug!("Replacing threshold: {}", threshold.id);
                *existing = threshold;
            }
            None => {
                debug!("Adding threshold: {}", threshold.id);
                thresholds.push(threshold);
            }
        }
    }

    /// 複数の閾値を追加
    pub async fn add_thresholds(&self, thresholds: impl IntoIterator<Item = AlertThreshold>) {
        for threshold in thresholds {
            self.add_threshold(threshold).await;
        }
    }

    /// 閾値を削除（存在しない場合は何もしない）
    pub async fn remove_threshold(&self, id: &str) -> bool {
        let mut thresholds = self.thresholds.write().await;
        let before = thresholds.len();
        thresholds.retain(|t| t.id != id);
        before != thresholds.len()
    }

    /// 登録済み閾値のID
    pub async fn thresholds(&self) -> Vec<String> {
        let thresholds = self.thresholds.read().await;
        thresholds.iter().map(|t| t.id.clone()).collect()
    }

    /// 発行されるアラートを購読
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// 全閾値を評価し、この呼び出しで発行したアラートを返す
    ///
    /// 述語や購読者のパニックは個別に捕捉してログに残し、残りの評価を続けます。
    pub async fn check_metrics(&self, aggregates: &AggregatedMetrics) -> Vec<Alert> {
        let thresholds = self.thresholds.read().await.clone();
        let mut emitted = Vec::new();

        for threshold in &thresholds {
            let triggered = match catch_unwind(AssertUnwindSafe(|| threshold.evaluate(aggregates))) {
                Ok(triggered) => triggered,
                Err(payload) => {
                    error!(
                        "Threshold {} evaluation panicked: {}",
                        threshold.id,
                        panic_message(payload.as_ref())
                    );
                    continue;
                }
            };

            if !triggered {
                continue;
            }

            let alert = Alert::from_threshold(threshold, aggregates);
            info!(
                "Alert triggered: {} [{}] {}",
                alert.threshold_id, alert.severity, alert.message
            );

            {
                let mut history = self.history.write().await;
                history.push_front(alert.clone());
                history.truncate(self.config.max_alert_history);
            }

            self.subscribers.notify(&alert);
            emitted.push(alert);
        }

        emitted
    }

    /// アラート履歴を新しい順に取得
    pub async fn get_alerts(&self) -> Vec<Alert> {
        let history = self.history.read().await;
        history.iter().cloned().collect()
    }

    /// アラート履歴をクリア
    pub async fn clear_alerts(&self) {
        self.history.write().await.clear();
    }

    /// 統計情報を取得
    pub async fn get_stats(&self) -> AlertStats {
        let history = self.history.read().await;

        let mut stats = AlertStats {
            total_count: history.len(),
            ..Default::default()
        };

        for alert in history.iter() {
            match alert.severity {
                AlertSeverity::Info => stats.info_count += 1,
                AlertSeverity::Warning => stats.warning_count += 1,
                AlertSeverity::Error => stats.error_count += 1,
            }
        }

        stats
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertManagerConfig::default())
    }
}

/// アラート統計
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_count: usize,
    pub info_count: usize,
    pub warning_count: usize,
    pub error_count: usize,
}
