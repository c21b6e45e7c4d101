//! Alert Threshold Types
//!
//! 集計メトリクスに対する任意の述語と、よく使う閾値のファクトリ。

use super::alert::AlertSeverity;
use crate::monitoring::aggregate::AggregatedMetrics;
use crate::monitoring::metrics::MetricKind;
use std::fmt;
use std::sync::Arc;

/// 閾値条件
pub type Condition = Arc<dyn Fn(&AggregatedMetrics) -> bool + Send + Sync>;

/// アラート閾値
#[derive(Clone)]
pub struct AlertThreshold {
    /// 一意なID
    pub id: String,
    pub name: String,
    /// アラートメッセージとして使われる説明
    pub description: String,
    /// 対象メトリクスの種類
    pub metric_kind: MetricKind,
    pub severity: AlertSeverity,
    condition: Condition,
}

impl AlertThreshold {
    /// 新しい閾値を作成
    pub fn new<F>(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        metric_kind: MetricKind,
        severity: AlertSeverity,
        condition: F,
    ) -> Self
    where
        F: Fn(&AggregatedMetrics) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            metric_kind,
            severity,
            condition: Arc::new(condition),
        }
    }

    /// IDを差し替え
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 重大度を差し替え
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// 条件を評価
    pub fn evaluate(&self, aggregates: &AggregatedMetrics) -> bool {
        (self.condition)(aggregates)
    }

    /// いずれかのコンポーネントの平均レンダー時間が `max_ms` を超える
    pub fn slow_render(max_ms: f64) -> Self {
        Self::new(
            "slow-render",
            "Slow render",
            format!("Component average render time exceeds {}ms", max_ms),
            MetricKind::Render,
            AlertSeverity::Warning,
            move |metrics| {
                metrics
                    .renders
                    .component_breakdown
                    .values()
                    .any(|stats| stats.average > max_ms)
            },
        )
    }

    /// 平均ヒープ使用量が `max_mb` を超える
    pub fn high_memory(max_mb: f64) -> Self {
        Self::new(
            "high-memory",
            "High memory usage",
            format!("Average memory usage exceeds {}MB", max_mb),
            MetricKind::Memory,
            AlertSeverity::Warning,
            move |metrics| metrics.memory.count > 0 && metrics.memory.average_used_mb() > max_mb,
        )
    }

    /// 平均ネットワーク時間が `max_ms` を超える
    pub fn slow_network(max_ms: f64) -> Self {
        Self::new(
            "slow-network",
            "Slow network",
            format!("Average network request time exceeds {}ms", max_ms),
            MetricKind::Network,
            AlertSeverity::Warning,
            move |metrics| metrics.network.stats.count > 0 && metrics.network.stats.average > max_ms,
        )
    }

    /// ステータス500以上の割合が `max_percent`% を超える
    pub fn high_error_rate(max_percent: f64) -> Self {
        Self::new(
            "high-error-rate",
            "High error rate",
            format!("Network error rate exceeds {}%", max_percent),
            MetricKind::Network,
            AlertSeverity::Error,
            move |metrics| {
                metrics.network.stats.count > 0 && metrics.network.error_rate * 100.0 > max_percent
            },
        )
    }
}

impl fmt::Debug for AlertThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertThreshold")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("metric_kind", &self.metric_kind)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

/// 標準の閾値セット
///
/// 16msレンダー / 100MBメモリ / 1000msネットワーク / 5%エラー率
pub fn default_thresholds() -> Vec<AlertThreshold> {
    vec![
        AlertThreshold::slow_render(16.0),
        AlertThreshold::high_memory(100.0),
        AlertThreshold::slow_network(1000.0),
        AlertThreshold::high_error_rate(5.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::MetricRecord;

    fn aggregate(records: &[MetricRecord]) -> AggregatedMetrics {
        AggregatedMetrics::from_records(records)
    }

    #[test]
    fn test_slow_render_checks_each_component() {
        let threshold = AlertThreshold::slow_render(16.0);

        let fast = aggregate(&[MetricRecord::render("A", 5.0), MetricRecord::render("B", 12.0)]);
        let slow = aggregate(&[MetricRecord::render("A", 5.0), MetricRecord::render("B", 40.0)]);

        assert!(!threshold.evaluate(&fast));
        assert!(threshold.evaluate(&slow));
    }

    #[test]
    fn test_high_memory() {
        let threshold = AlertThreshold::high_memory(100.0);
        let mb = 1024 * 1024;

        assert!(!threshold.evaluate(&aggregate(&[])));
        assert!(!threshold.evaluate(&aggregate(&[MetricRecord::memory(80 * mb, 0)])));
        assert!(threshold.evaluate(&aggregate(&[MetricRecord::memory(150 * mb, 0)])));
    }

    #[test]
    fn test_high_error_rate_uses_server_errors_only() {
        let threshold = AlertThreshold::high_error_rate(20.0);

        let client_errors = aggregate(&[
            MetricRecord::network("/a", 10.0, 404, 0),
            MetricRecord::network("/a", 10.0, 200, 0),
        ]);
        let server_errors = aggregate(&[
            MetricRecord::network("/a", 10.0, 502, 0),
            MetricRecord::network("/a", 10.0, 200, 0),
        ]);

        assert!(!threshold.evaluate(&client_errors));
        assert!(threshold.evaluate(&server_errors));
        assert_eq!(threshold.severity, AlertSeverity::Error);
    }

    #[test]
    fn test_slow_network() {
        let threshold = AlertThreshold::slow_network(1000.0).with_id("api-latency");

        assert_eq!(threshold.id, "api-latency");
        assert!(threshold.evaluate(&aggregate(&[MetricRecord::network("/a", 1500.0, 200, 0)])));
        assert!(!threshold.evaluate(&aggregate(&[MetricRecord::network("/a", 900.0, 200, 0)])));
    }

    #[test]
    fn test_default_thresholds_have_unique_ids() {
        let thresholds = default_thresholds();
        let mut ids: Vec<&str> = thresholds.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), thresholds.len());
    }
}
