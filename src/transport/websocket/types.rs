//! リレー共通型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// 接続ID型
pub type ConnectionId = Uuid;

/// 接続状態
///
/// `Connecting -> Open -> Closed` の順にのみ遷移します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// 接続中
    Connecting,
    /// 接続済み
    Open,
    /// 切断済み
    Closed,
}

/// 追跡中クライアントの情報
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// 接続ID
    pub id: ConnectionId,
    /// クライアントアドレス
    pub addr: SocketAddr,
    /// 接続時刻
    pub connected_at: DateTime<Utc>,
}

/// リレー統計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatistics {
    /// 現在の接続数
    pub active_connections: usize,
    /// 受理した総接続数
    pub total_connections: u64,
    /// 上限超過で拒否した接続数
    pub rejected_connections: u64,
    /// 再配信したクライアントメッセージ数
    pub messages_relayed: u64,
    /// 検証に失敗して破棄したメッセージ数
    pub invalid_messages: u64,
    /// サーバー発のブロードキャスト数
    pub broadcasts: u64,
}

/// クローズフレームの内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}
