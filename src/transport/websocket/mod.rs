//! WebSocketメトリクスリレー
//!
//! - [`server::MetricsRelay`]: クライアント間のメトリクス中継とサーバー発ブロードキャスト
//! - [`client::RelayClient`]: リレーへの接続
//! - [`bridge::RelayBridge`]: コレクター・アラートの転送
//! - [`protocol`]: JSONワイヤ形式と受信メッセージ検証

pub mod bridge;
pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod types;

pub use bridge::RelayBridge;
pub use client::RelayClient;
pub use handler::{CollectorSink, MetricsSink, NoopSink};
pub use protocol::{validate_inbound, RelayMessage};
pub use server::{MetricsRelay, RelayConfig};
pub use types::{ClientInfo, CloseInfo, ConnectionId, ConnectionState, RelayStatistics};
