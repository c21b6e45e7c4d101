//! メトリクスリレーサーバー
//!
//! Axumベースのファンアウトサーバー。クライアントから受信したメトリクスを
//! 検証し、送信元以外の全クライアントへ再配信します。

use super::handler::{MetricsSink, NoopSink};
use super::protocol::{
    validate_inbound, RelayMessage, CLOSE_GOING_AWAY, CLOSE_TRY_AGAIN_LATER, MAX_CLIENTS_REASON,
    SHUTDOWN_REASON,
};
use super::types::{ClientInfo, ConnectionId, RelayStatistics};
use crate::error::{Error, Result};
use crate::monitoring::{Alert, MetricsUpdate};
use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// クローズ送信後にクライアントの応答を待つ時間
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// 停止時にリスナー終了を待つ時間
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// リレー設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// バインドホスト
    pub host: String,
    /// バインドポート（0でOSが割り当て）
    pub port: u16,
    /// WebSocketパス
    pub path: String,
    /// 同時接続の上限
    pub max_clients: usize,
    /// permessage-deflateの希望（現在のサーバーはネゴシエートしません）
    pub enable_compression: bool,
    /// 受信メッセージの最大サイズ (bytes)
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            path: "/metrics".to_string(),
            max_clients: 100,
            enable_compression: true,
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

struct ClientHandle {
    info: ClientInfo,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct RelayCounters {
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    messages_relayed: AtomicU64,
    invalid_messages: AtomicU64,
    broadcasts: AtomicU64,
}

/// リレー共有状態
#[derive(Clone)]
struct RelayState {
    config: Arc<RelayConfig>,
    /// 追跡中のクライアント（接続済みのみ）
    clients: Arc<Mutex<HashMap<ConnectionId, ClientHandle>>>,
    sink: Arc<dyn MetricsSink>,
    counters: Arc<RelayCounters>,
}

impl RelayState {
    fn new(config: RelayConfig, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            config: Arc::new(config),
            clients: Arc::new(Mutex::new(HashMap::new())),
            sink,
            counters: Arc::new(RelayCounters::default()),
        }
    }

    /// 上限内なら登録して `true`
    ///
    /// 上限チェックと登録は同じロック内で行います。
    async fn admit(
        &self,
        id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> bool {
        let mut clients = self.clients.lock().await;
        if clients.len() >= self.config.max_clients {
            return false;
        }

        // 受理通知は他のブロードキャストより先にキューへ入れる
        if let Ok(text) = RelayMessage::Connected.to_json() {
            let _ = sender.send(Message::Text(Utf8Bytes::from(text)));
        }

        clients.insert(
            id,
            ClientHandle {
                info: ClientInfo {
                    id,
                    addr,
                    connected_at: Utc::now(),
                },
                sender,
            },
        );
        self.counters.total_connections.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn remove(&self, id: ConnectionId) -> bool {
        self.clients.lock().await.remove(&id).is_some()
    }

    /// 送信元を除く全クライアントへ送信し、キューに入れられた件数を返す
    async fn fan_out(&self, payload: Utf8Bytes, exclude: Option<ConnectionId>) -> usize {
        let clients = self.clients.lock().await;
        let mut delivered = 0;

        for (id, client) in clients.iter() {
            if Some(*id) == exclude {
                continue;
            }
            match client.sender.send(Message::Text(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(_) => debug!("Skipping closed connection {}", id),
            }
        }

        delivered
    }

    async fn handle_inbound(&self, origin: ConnectionId, text: Utf8Bytes) {
        match validate_inbound(text.as_str()) {
            Ok(update) => {
                self.sink.on_metric(origin, &update).await;
                let recipients = self.fan_out(text, Some(origin)).await;
                self.counters.messages_relayed.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Relayed {} metric from {} to {} clients",
                    update.kind, origin, recipients
                );
            }
            Err(e) => {
                self.counters.invalid_messages.fetch_add(1, Ordering::SeqCst);
                warn!("Dropping message from {}: {}", origin, e);
            }
        }
    }
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

/// メトリクスリレー
pub struct MetricsRelay {
    state: RelayState,
    running: Mutex<Option<RunningServer>>,
}

impl MetricsRelay {
    /// 受信メトリクスを取り込まないリレーを作成
    pub fn new(config: RelayConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    /// シンク付きでリレーを作成
    pub fn with_sink(config: RelayConfig, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: RelayState::new(config, sink),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.state.config
    }

    /// リレーを起動し、バインドしたアドレスを返す
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::Server("Relay is already running".to_string()));
        }

        let config = self.state.config.clone();
        if !config.path.starts_with('/') {
            return Err(Error::Config(format!(
                "Relay path must start with '/': {}",
                config.path
            )));
        }

        let app = Router::new()
            .route(&config.path, get(websocket_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                Error::Server(format!(
                    "Failed to bind {}:{}: {}",
                    config.host, config.port, e
                ))
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        });

        if config.enable_compression {
            debug!("permessage-deflate requested but not negotiated by this server");
        }
        info!(
            "Metrics relay listening on ws://{}{} (max clients: {})",
            local_addr, config.path, config.max_clients
        );

        *running = Some(RunningServer {
            local_addr,
            shutdown: shutdown_tx,
            handle,
        });
        Ok(local_addr)
    }

    /// 全クライアントを切断してリレーを停止
    pub async fn stop(&self) -> Result<()> {
        let server = self
            .running
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Server("Relay is not running".to_string()))?;

        let closed = {
            let mut clients = self.state.clients.lock().await;
            let count = clients.len();
            for (_, client) in clients.drain() {
                let _ = client.sender.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: Utf8Bytes::from_static(SHUTDOWN_REASON),
                })));
            }
            count
        };

        let _ = server.shutdown.send(());

        match timeout(SHUTDOWN_TIMEOUT, server.handle).await {
            Ok(Ok(Ok(()))) => {
                info!(
                    "Metrics relay on {} stopped ({} clients closed)",
                    server.local_addr, closed
                );
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(Error::Server(format!("Relay listener failed: {}", e))),
            Ok(Err(e)) => Err(Error::Server(format!("Relay task failed: {}", e))),
            Err(_) => Err(Error::Server("Relay shutdown timed out".to_string())),
        }
    }

    /// 実行中か
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// バインド中のアドレス
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|server| server.local_addr)
    }

    /// メトリクス更新を全クライアントへ配信し、送信件数を返す
    pub async fn broadcast(&self, update: &MetricsUpdate) -> Result<usize> {
        let text = RelayMessage::Metric(update.clone()).to_json()?;
        Ok(self.broadcast_text(text).await)
    }

    /// アラートを全クライアントへ配信し、送信件数を返す
    pub async fn broadcast_alert(&self, alert: &Alert) -> Result<usize> {
        let text = RelayMessage::Alert(alert.clone()).to_json()?;
        Ok(self.broadcast_text(text).await)
    }

    async fn broadcast_text(&self, text: String) -> usize {
        self.state.counters.broadcasts.fetch_add(1, Ordering::SeqCst);
        self.state.fan_out(Utf8Bytes::from(text), None).await
    }

    /// 現在の接続数
    pub async fn client_count(&self) -> usize {
        self.state.clients.lock().await.len()
    }

    /// 接続中クライアントの一覧
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.state
            .clients
            .lock()
            .await
            .values()
            .map(|client| client.info.clone())
            .collect()
    }

    /// リレー統計を取得
    pub async fn statistics(&self) -> RelayStatistics {
        let counters = &self.state.counters;
        RelayStatistics {
            active_connections: self.client_count().await,
            total_connections: counters.total_connections.load(Ordering::SeqCst),
            rejected_connections: counters.rejected_connections.load(Ordering::SeqCst),
            messages_relayed: counters.messages_relayed.load(Ordering::SeqCst),
            invalid_messages: counters.invalid_messages.load(Ordering::SeqCst),
            broadcasts: counters.broadcasts.load(Ordering::SeqCst),
        }
    }
}

/// WebSocketアップグレードハンドラ
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let limit = state.config.max_message_size;

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(move |e| warn!("WebSocket upgrade from {} failed: {}", addr, e))
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// WebSocket接続を処理
async fn handle_socket(socket: WebSocket, state: RelayState, addr: SocketAddr) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    if !state.admit(conn_id, addr, tx).await {
        state
            .counters
            .rejected_connections
            .fetch_add(1, Ordering::SeqCst);
        warn!("Max clients reached, rejecting {}", addr);
        reject(socket).await;
        return;
    }

    info!("Client connected: {} from {}", conn_id, addr);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (closed_tx, mut closed_rx) = oneshot::channel::<()>();

    // 送信はこのタスクに集約する
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sender.send(message).await {
                debug!("Send to {} failed: {}", conn_id, e);
                break;
            }
            if closing {
                let _ = closed_tx.send(());
                break;
            }
        }
    });

    let mut close_pending = true;
    loop {
        let result = tokio::select! {
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
            sent = &mut closed_rx, if close_pending => {
                close_pending = false;
                if sent.is_ok() {
                    // こちらからクローズ済み: 応答は猶予時間だけ待つ
                    await_close_reply(&mut ws_receiver, conn_id).await;
                    break;
                }
                continue;
            }
        };

        match result {
            Ok(Message::Text(text)) => state.handle_inbound(conn_id, text).await,
            Ok(Message::Binary(_)) => {
                state
                    .counters
                    .invalid_messages
                    .fetch_add(1, Ordering::SeqCst);
                warn!("Dropping binary frame from {}", conn_id);
            }
            Ok(Message::Close(frame)) => {
                debug!("Close from {}: {:?}", conn_id, frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error on {}: {}", conn_id, e);
                break;
            }
        }
    }

    // 登録解除で送信チャネルが閉じ、送信タスクも終了する
    state.remove(conn_id).await;
    let _ = writer.await;

    info!("Client disconnected: {}", conn_id);
}

/// 送信済みクローズへの応答を `CLOSE_GRACE` まで待つ
///
/// 応答しないクライアントでも、戻った後に受信側を破棄すれば接続は閉じられます。
async fn await_close_reply<S>(receiver: &mut S, conn_id: ConnectionId)
where
    S: futures::Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
{
    let replied = timeout(CLOSE_GRACE, async {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
    .await;

    if replied.is_err() {
        debug!("No close reply from {}, dropping connection", conn_id);
    }
}

/// 上限超過の接続をクローズコード1013で閉じる
async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: CLOSE_TRY_AGAIN_LATER,
        reason: Utf8Bytes::from_static(MAX_CLIENTS_REASON),
    };
    if socket.send(Message::Close(Some(frame))).await.is_err() {
        return;
    }

    let _ = timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = socket.recv().await {}
    })
    .await;
}
