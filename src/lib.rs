//! # perfmon-rs
//!
//! UIパフォーマンス監視のためのメトリクス収集・閾値アラート・WebSocketリレー。
//!
//! - [`monitoring::MetricsCollector`]: レンダー/メモリ/ネットワーク/カスタム計測のリングバッファと集計
//! - [`monitoring::AlertManager`]: 閾値評価・アラート履歴・購読者通知
//! - [`transport::MetricsRelay`]: 接続中ダッシュボードへのメトリクス中継

pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod transport;

pub use error::{Error, Result};
pub use monitoring::{AlertManager, AlertMonitor, MetricsCollector};
pub use transport::{MetricsRelay, RelayClient, RelayConfig};
