//! 集計メトリクス
//!
//! バッファ内のレコードから種類別の集計ビューを都度計算します。永続化はしません。

use super::metrics::{now_millis, MemoryMetric, MetricKind, MetricRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// ネットワークエラーとみなすステータスコードの下限
pub const SERVER_ERROR_STATUS: u16 = 500;

/// ステータスコードがエラーかどうか
pub fn is_error_status(status_code: u16) -> bool {
    status_code >= SERVER_ERROR_STATUS
}

/// 件数・合計・平均・最小・最大
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: u64,
    pub total: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

impl SummaryStats {
    /// 値を1件加算
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.total += value;
        self.average = self.total / self.count as f64;
    }

    /// 値の列から集計
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        for value in values {
            stats.observe(value);
        }
        stats
    }
}

/// レンダー集計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderSummary {
    pub stats: SummaryStats,
    /// コンポーネントID別
    pub component_breakdown: HashMap<String, SummaryStats>,
}

impl RenderSummary {
    /// 平均レンダー時間が最も長いコンポーネント
    pub fn slowest_component(&self) -> Option<(&str, &SummaryStats)> {
        self.component_breakdown
            .iter()
            .max_by(|a, b| a.1.average.total_cmp(&b.1.average))
            .map(|(id, stats)| (id.as_str(), stats))
    }
}

/// メモリ集計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub count: u64,
    pub average_used_bytes: f64,
    pub max_used_bytes: u64,
    /// 最新のスナップショット
    pub latest: Option<MemoryMetric>,
}

impl MemorySummary {
    /// 平均使用量（MB）
    pub fn average_used_mb(&self) -> f64 {
        self.average_used_bytes / (1024.0 * 1024.0)
    }
}

/// ネットワーク集計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub stats: SummaryStats,
    /// URL別
    pub url_breakdown: HashMap<String, SummaryStats>,
    /// ステータスコード別の件数
    pub status_breakdown: HashMap<u16, u64>,
    /// ステータス500以上の件数
    pub error_count: u64,
    /// エラー率（0.0〜1.0）
    pub error_rate: f64,
}

/// カスタム値集計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomSummary {
    pub count: u64,
    /// 名前別
    pub by_name: HashMap<String, SummaryStats>,
}

/// 集計メトリクス
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub renders: RenderSummary,
    pub memory: MemorySummary,
    pub network: NetworkSummary,
    pub custom: CustomSummary,
    pub total_records: usize,
    /// 集計時刻（エポックミリ秒）
    pub computed_at: i64,
}

impl AggregatedMetrics {
    /// レコード列から集計（O(n)）
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MetricRecord>) -> Self {
        let mut aggregated = Self {
            computed_at: now_millis(),
            ..Self::default()
        };
        let mut memory_total = 0.0;

        for record in records {
            aggregated.total_records += 1;

            match record {
                MetricRecord::Render(m) => {
                    aggregated.renders.stats.observe(m.duration_ms);
                    aggregated
                        .renders
                        .component_breakdown
                        .entry(m.component_id.clone())
                        .or_default()
                        .observe(m.duration_ms);
                }
                MetricRecord::Memory(m) => {
                    let memory = &mut aggregated.memory;
                    memory.count += 1;
                    memory_total += m.used_bytes as f64;
                    memory.max_used_bytes = memory.max_used_bytes.max(m.used_bytes);
                    memory.latest = Some(m.clone());
                }
                MetricRecord::Network(m) => {
                    let network = &mut aggregated.network;
                    network.stats.observe(m.duration_ms);
                    network
                        .url_breakdown
                        .entry(m.url.clone())
                        .or_default()
                        .observe(m.duration_ms);
                    *network.status_breakdown.entry(m.status_code).or_insert(0) += 1;
                    if is_error_status(m.status_code) {
                        network.error_count += 1;
                    }
                }
                MetricRecord::Custom(m) => {
                    aggregated.custom.count += 1;
                    aggregated
                        .custom
                        .by_name
                        .entry(m.name.clone())
                        .or_default()
                        .observe(m.value);
                }
            }
        }

        if aggregated.memory.count > 0 {
            aggregated.memory.average_used_bytes = memory_total / aggregated.memory.count as f64;
        }
        if aggregated.network.stats.count > 0 {
            aggregated.network.error_rate =
                aggregated.network.error_count as f64 / aggregated.network.stats.count as f64;
        }

        aggregated
    }

    /// 指定種類に関係する部分だけを取り出す
    pub fn snapshot_for(&self, kind: MetricKind) -> AlertSnapshot {
        match kind {
            MetricKind::Render => AlertSnapshot::Render(self.renders.clone()),
            MetricKind::Memory => AlertSnapshot::Memory(self.memory.clone()),
            MetricKind::Network => AlertSnapshot::Network(self.network.clone()),
            MetricKind::Custom => AlertSnapshot::Custom(self.custom.clone()),
        }
    }
}

/// アラートに添付する集計の部分スナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSnapshot {
    Render(RenderSummary),
    Memory(MemorySummary),
    Network(NetworkSummary),
    Custom(CustomSummary),
}

impl AlertSnapshot {
    /// 種類を取得
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Render(_) => MetricKind::Render,
            Self::Memory(_) => MetricKind::Memory,
            Self::Network(_) => MetricKind::Network,
            Self::Custom(_) => MetricKind::Custom,
        }
    }
}
