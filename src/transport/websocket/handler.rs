//! 受信メトリクスの取り込みフック

use super::types::ConnectionId;
use crate::monitoring::{MetricRecord, MetricsCollector, MetricsUpdate};
use async_trait::async_trait;
use tracing::{debug, warn};

/// 検証済みの受信メトリクスを受け取るシンク
///
/// 再配信の前に呼ばれます。
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn on_metric(&self, origin: ConnectionId, update: &MetricsUpdate);
}

/// 何もしないシンク
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl MetricsSink for NoopSink {
    async fn on_metric(&self, origin: ConnectionId, update: &MetricsUpdate) {
        debug!("Relayed {} metric from {}", update.kind, origin);
    }
}

/// コレクターに取り込むシンク
///
/// 取り込んだレコードはコレクターの購読者に通知しません
/// （リレーが既に他のクライアントへ配信済みのため）。
#[derive(Clone)]
pub struct CollectorSink {
    collector: MetricsCollector,
}

impl CollectorSink {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl MetricsSink for CollectorSink {
    async fn on_metric(&self, origin: ConnectionId, update: &MetricsUpdate) {
        match MetricRecord::from_update(update) {
            Ok(record) => self.collector.ingest(record).await,
            Err(e) => warn!("Metric from {} not ingested: {}", origin, e),
        }
    }
}
