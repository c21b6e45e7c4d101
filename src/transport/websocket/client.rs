//! リレークライアント
//!
//! ダッシュボードやテストからリレーに接続するためのクライアント。

use super::protocol::RelayMessage;
use super::types::{CloseInfo, ConnectionState};
use crate::error::{Error, Result};
use crate::monitoring::{MetricRecord, MetricsCollector, MetricsUpdate};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// リレー接続
#[derive(Debug)]
pub struct RelayClient {
    url: String,
    stream: WsStream,
    state: ConnectionState,
    close_info: Option<CloseInfo>,
}

impl RelayClient {
    /// リレーに接続
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        debug!("Connected to relay at {}", url);

        Ok(Self {
            url: url.to_string(),
            stream,
            state: ConnectionState::Open,
            close_info: None,
        })
    }

    /// タイムアウト付きで接続
    pub async fn connect_with_timeout(url: &str, limit: Duration) -> Result<Self> {
        tokio::time::timeout(limit, Self::connect(url))
            .await
            .map_err(|_| Error::Connection(format!("Connection to {} timed out", url)))?
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// サーバーから受信したクローズフレーム
    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    /// メトリクス更新を送信
    pub async fn send_metric(&mut self, update: &MetricsUpdate) -> Result<()> {
        let text = serde_json::to_string(update)?;
        self.send_text(text).await
    }

    /// 生のテキストフレームを送信
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::Connection("Connection is closed".to_string()));
        }
        let text: String = text.into();
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// 次のメッセージを受信（切断時は `None`）
    ///
    /// Ping/Pong・バイナリフレームは読み飛ばします。
    pub async fn next_message(&mut self) -> Result<Option<RelayMessage>> {
        loop {
            if self.state == ConnectionState::Closed {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return RelayMessage::parse(text.as_str()).map(Some),
                Some(Ok(Message::Close(frame))) => {
                    self.close_info = frame.map(|f| CloseInfo {
                        code: f.code.into(),
                        reason: f.reason.to_string(),
                    });
                    self.state = ConnectionState::Closed;
                    debug!("Relay closed the connection: {:?}", self.close_info);
                }
                Some(Ok(Message::Binary(_))) => debug!("Ignoring binary frame from relay"),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.state = ConnectionState::Closed;
                    return Err(e.into());
                }
                None => {
                    self.state = ConnectionState::Closed;
                    return Ok(None);
                }
            }
        }
    }

    /// タイムアウト付きで次のメッセージを受信
    pub async fn next_message_timeout(&mut self, limit: Duration) -> Result<Option<RelayMessage>> {
        tokio::time::timeout(limit, self.next_message())
            .await
            .map_err(|_| Error::Connection("Timed out waiting for relay message".to_string()))?
    }

    /// 接続をクローズ
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// 受信したメトリクスを切断までコレクターに記録し、記録件数を返す
    ///
    /// 形式が不正なメッセージは読み飛ばします。
    pub async fn echo_into(mut self, collector: &MetricsCollector) -> Result<usize> {
        let mut echoed = 0;

        loop {
            match self.next_message().await {
                Ok(Some(RelayMessage::Metric(update))) => match MetricRecord::from_update(&update) {
                    Ok(record) => {
                        collector.record(record).await;
                        echoed += 1;
                    }
                    Err(e) => warn!("Skipping relayed metric: {}", e),
                },
                Ok(Some(RelayMessage::Alert(alert))) => {
                    info!("Relay alert [{}]: {}", alert.severity, alert.message)
                }
                Ok(Some(RelayMessage::Connected)) => debug!("Relay acknowledged connection"),
                Ok(None) => break,
                Err(e) if e.is_validation() => warn!("Skipping relay message: {}", e),
                Err(e) => return Err(e),
            }
        }

        Ok(echoed)
    }
}
