//! パフォーマンス監視システム
//!
//! このモジュールは、レンダー・メモリ・ネットワーク・カスタムメトリクスの収集、
//! 集計、閾値アラート機能を提供します。

pub mod aggregate;
pub mod alerts;
pub mod collector;
pub mod metrics;
pub mod monitor;
pub mod sampler;
pub mod subscription;

pub use aggregate::{AggregatedMetrics, AlertSnapshot, SummaryStats};
pub use alerts::{Alert, AlertManager, AlertManagerConfig, AlertSeverity, AlertThreshold};
pub use collector::{CollectorConfig, MetricsCollector, RenderTimer};
pub use metrics::{MetricKind, MetricRecord, MetricsUpdate};
pub use monitor::AlertMonitor;
pub use sampler::{MemorySampler, SysinfoSampler};
pub use subscription::Subscription;
