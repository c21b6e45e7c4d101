//! メトリクスレコード型定義
//!
//! レンダー・メモリ・ネットワーク・カスタムの4種類の計測値と、
//! リレーで送受信するワイヤ形式（`MetricsUpdate`）を定義します。

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;

/// 現在時刻（Unixエポックからのミリ秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// メトリクスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// コンポーネントのレンダー時間
    Render,
    /// メモリ使用量
    Memory,
    /// ネットワークリクエスト
    Network,
    /// カスタムメトリクス
    Custom,
}

impl MetricKind {
    /// 全種類
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Render,
        MetricKind::Memory,
        MetricKind::Network,
        MetricKind::Custom,
    ];

    /// ワイヤ上の名前を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Memory => "memory",
            Self::Network => "network",
            Self::Custom => "custom",
        }
    }

    /// ワイヤ上の名前から変換
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// レンダー計測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetric {
    pub component_id: String,
    pub duration_ms: f64,
    #[serde(default)]
    pub timestamp: i64,
}

/// メモリスナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetric {
    pub used_bytes: u64,
    pub total_bytes: u64,
    #[serde(default)]
    pub timestamp: i64,
}

/// ネットワークリクエスト計測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetric {
    pub url: String,
    pub duration_ms: f64,
    pub status_code: u16,
    pub size_bytes: u64,
    #[serde(default)]
    pub timestamp: i64,
}

/// カスタム値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMetric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub timestamp: i64,
}

/// メトリクスレコード
///
/// 呼び出し側（フック層）が整形済みの値を渡す前提で、コレクター自体は検証しません。
/// リレー経由の入力は [`MetricRecord::from_update`] で型付けされます。
#[derive(Debug, Clone, PartialEq)]
pub enum MetricRecord {
    Render(RenderMetric),
    Memory(MemoryMetric),
    Network(NetworkMetric),
    Custom(CustomMetric),
}

impl MetricRecord {
    /// 現在時刻でレンダー計測を作成
    pub fn render(component_id: impl Into<String>, duration_ms: f64) -> Self {
        Self::Render(RenderMetric {
            component_id: component_id.into(),
            duration_ms,
            timestamp: now_millis(),
        })
    }

    /// 現在時刻でメモリスナップショットを作成
    pub fn memory(used_bytes: u64, total_bytes: u64) -> Self {
        Self::Memory(MemoryMetric {
            used_bytes,
            total_bytes,
            timestamp: now_millis(),
        })
    }

    /// 現在時刻でネットワーク計測を作成
    pub fn network(
        url: impl Into<String>,
        duration_ms: f64,
        status_code: u16,
        size_bytes: u64,
    ) -> Self {
        Self::Network(NetworkMetric {
            url: url.into(),
            duration_ms,
            status_code,
            size_bytes,
            timestamp: now_millis(),
        })
    }

    /// 現在時刻でカスタム値を作成
    pub fn custom(name: impl Into<String>, value: f64) -> Self {
        Self::Custom(CustomMetric {
            name: name.into(),
            value,
            labels: HashMap::new(),
            timestamp: now_millis(),
        })
    }

    /// ラベルを追加（カスタム値以外では何もしない）
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Custom(metric) = &mut self {
            metric.labels.insert(key.into(), value.into());
        }
        self
    }

    /// 種類を取得
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Render(_) => MetricKind::Render,
            Self::Memory(_) => MetricKind::Memory,
            Self::Network(_) => MetricKind::Network,
            Self::Custom(_) => MetricKind::Custom,
        }
    }

    /// タイムスタンプを取得
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Render(m) => m.timestamp,
            Self::Memory(m) => m.timestamp,
            Self::Network(m) => m.timestamp,
            Self::Custom(m) => m.timestamp,
        }
    }

    /// ワイヤ形式に変換
    pub fn to_update(&self) -> MetricsUpdate {
        let metric = match self {
            Self::Render(m) => json!({
                "componentId": m.component_id,
                "durationMs": m.duration_ms,
                "timestamp": m.timestamp,
            }),
            Self::Memory(m) => json!({
                "usedBytes": m.used_bytes,
                "totalBytes": m.total_bytes,
                "timestamp": m.timestamp,
            }),
            Self::Network(m) => json!({
                "url": m.url,
                "durationMs": m.duration_ms,
                "statusCode": m.status_code,
                "sizeBytes": m.size_bytes,
                "timestamp": m.timestamp,
            }),
            Self::Custom(m) => json!({
                "name": m.name,
                "value": m.value,
                "labels": m.labels,
                "timestamp": m.timestamp,
            }),
        };

        MetricsUpdate {
            kind: self.kind(),
            timestamp: self.timestamp(),
            metric,
        }
    }

    /// ワイヤ形式から型付きレコードに変換
    ///
    /// 外側の `timestamp` がレコードのタイムスタンプになります。
    pub fn from_update(update: &MetricsUpdate) -> Result<Self> {
        let payload = update.metric.clone();
        let invalid = |e: serde_json::Error| {
            Error::InvalidMetric(format!("{} payload: {}", update.kind, e))
        };

        let record = match update.kind {
            MetricKind::Render => {
                let mut m: RenderMetric = serde_json::from_value(payload).map_err(invalid)?;
                m.timestamp = update.timestamp;
                Self::Render(m)
            }
            MetricKind::Memory => {
                let mut m: MemoryMetric = serde_json::from_value(payload).map_err(invalid)?;
                m.timestamp = update.timestamp;
                Self::Memory(m)
            }
            MetricKind::Network => {
                let mut m: NetworkMetric = serde_json::from_value(payload).map_err(invalid)?;
                m.timestamp = update.timestamp;
                Self::Network(m)
            }
            MetricKind::Custom => {
                let mut m: CustomMetric = serde_json::from_value(payload).map_err(invalid)?;
                m.timestamp = update.timestamp;
                Self::Custom(m)
            }
        };

        Ok(record)
    }
}

/// リレーで送受信するメトリクスメッセージ
///
/// `{"type": "render", "timestamp": 1700000000000, "metric": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub timestamp: i64,
    pub metric: Value,
}

impl From<&MetricRecord> for MetricsUpdate {
    fn from(record: &MetricRecord) -> Self {
        record.to_update()
    }
}
