//! Alert Types

use super::threshold::AlertThreshold;
use crate::monitoring::aggregate::{AggregatedMetrics, AlertSnapshot};
use crate::monitoring::metrics::{now_millis, MetricKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// アラート重大度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// 情報
    Info,
    /// 警告
    Warning,
    /// エラー
    Error,
}

impl AlertSeverity {
    /// 重大度名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// アラート
///
/// 生成後は変更しません。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// `alert_<timestamp>_<thresholdId>`
    ///
    /// 同じミリ秒に同じ閾値が再発行されると重複するため、一意キーではありません。
    pub id: String,
    pub threshold_id: String,
    /// 発生時刻（エポックミリ秒）
    pub timestamp: i64,
    pub message: String,
    pub severity: AlertSeverity,
    /// 閾値の種類に関係する集計スナップショット
    pub metrics: AlertSnapshot,
}

impl Alert {
    /// 閾値と集計からアラートを作成
    pub fn from_threshold(threshold: &AlertThreshold, aggregates: &AggregatedMetrics) -> Self {
        let timestamp = now_millis();
        Self {
            id: format!("alert_{}_{}", timestamp, threshold.id),
            threshold_id: threshold.id.clone(),
            timestamp,
            message: threshold.description.clone(),
            severity: threshold.severity,
            metrics: aggregates.snapshot_for(threshold.metric_kind),
        }
    }

    /// 対象メトリクスの種類
    pub fn kind(&self) -> MetricKind {
        self.metrics.kind()
    }
}
