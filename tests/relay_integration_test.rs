//! メトリクスリレー統合テスト

use perfmon_rs::monitoring::{
    AggregatedMetrics, Alert, AlertManager, AlertThreshold, CollectorConfig, MetricRecord,
    MetricsCollector,
};
use perfmon_rs::transport::websocket::protocol::{CLOSE_GOING_AWAY, CLOSE_TRY_AGAIN_LATER};
use perfmon_rs::transport::websocket::{
    CollectorSink, ConnectionState, MetricsRelay, RelayBridge, RelayClient, RelayConfig,
    RelayMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn relay_config(max_clients: usize) -> RelayConfig {
    RelayConfig {
        port: 0,
        max_clients,
        ..Default::default()
    }
}

async fn start(relay: &MetricsRelay) -> String {
    let addr = relay.start().await.unwrap();
    format!("ws://{}{}", addr, relay.config().path)
}

/// 接続して受理通知を読み捨てる
async fn connect(url: &str) -> RelayClient {
    let mut client = RelayClient::connect_with_timeout(url, WAIT).await.unwrap();
    let ack = client.next_message_timeout(WAIT).await.unwrap();
    assert_eq!(ack, Some(RelayMessage::Connected));
    client
}

async fn wait_for_clients(relay: &MetricsRelay, expected: usize) {
    for _ in 0..100 {
        if relay.client_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} clients, found {}",
        expected,
        relay.client_count().await
    );
}

async fn wait_for_records(collector: &MetricsCollector, expected: usize) {
    for _ in 0..100 {
        if collector.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} records, found {}",
        expected,
        collector.len().await
    );
}

fn quiet_collector() -> MetricsCollector {
    MetricsCollector::new(CollectorConfig::default())
}

#[tokio::test]
async fn test_connection_is_acknowledged_and_tracked() {
    let relay = MetricsRelay::new(relay_config(10));
    let url = start(&relay).await;

    let client = connect(&url).await;

    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(relay.client_count().await, 1);
    let stats = relay.statistics().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(relay.clients().await.len(), 1);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_client_metric_reaches_every_other_client() {
    let relay = MetricsRelay::new(relay_config(10));
    let url = start(&relay).await;

    let mut producer = connect(&url).await;
    let mut first = connect(&url).await;
    let mut second = connect(&url).await;

    let update = MetricRecord::render("Chart", 12.5).to_update();
    producer.send_metric(&update).await.unwrap();

    for peer in [&mut first, &mut second] {
        let received = peer.next_message_timeout(WAIT).await.unwrap();
        assert_eq!(received, Some(RelayMessage::Metric(update.clone())));
    }

    // 送信元には戻らない
    assert_err!(producer.next_message_timeout(QUIET).await);
    assert_eq!(relay.statistics().await.messages_relayed, 1);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_connection_over_limit_is_closed_with_1013() {
    let relay = MetricsRelay::new(relay_config(1));
    let url = start(&relay).await;

    let _admitted = connect(&url).await;

    let mut rejected = RelayClient::connect_with_timeout(&url, WAIT).await.unwrap();
    let next = rejected.next_message_timeout(WAIT).await.unwrap();

    assert_eq!(next, None);
    assert_eq!(rejected.state(), ConnectionState::Closed);
    let close = rejected.close_info().expect("close frame");
    assert_eq!(close.code, CLOSE_TRY_AGAIN_LATER);
    assert_eq!(close.reason, "Maximum number of clients reached");

    assert_eq!(relay.client_count().await, 1);
    assert_eq!(relay.statistics().await.rejected_connections, 1);

    // 拒否された接続は配信対象に含まれない
    let update = MetricRecord::custom("after-reject", 1.0).to_update();
    assert_eq!(relay.broadcast(&update).await.unwrap(), 1);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_slot_is_freed_when_client_leaves() {
    let relay = MetricsRelay::new(relay_config(1));
    let url = start(&relay).await;

    let mut first = connect(&url).await;
    first.close().await.unwrap();
    wait_for_clients(&relay, 0).await;

    let second = connect(&url).await;
    assert_eq!(second.state(), ConnectionState::Open);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_invalid_messages_are_dropped_without_disconnect() {
    let relay = MetricsRelay::new(relay_config(10));
    let url = start(&relay).await;

    let mut producer = connect(&url).await;
    let mut peer = connect(&url).await;

    producer.send_text("not json").await.unwrap();
    producer
        .send_text(r#"{"type":"cpu","timestamp":1,"metric":{}}"#)
        .await
        .unwrap();
    producer
        .send_text(r#"{"type":"render","timestamp":1,"metric":null}"#)
        .await
        .unwrap();

    let valid = MetricRecord::custom("fps", 58.0).to_update();
    producer.send_metric(&valid).await.unwrap();

    let received = peer.next_message_timeout(WAIT).await.unwrap();
    assert_eq!(received, Some(RelayMessage::Metric(valid)));

    let stats = relay.statistics().await;
    assert_eq!(stats.invalid_messages, 3);
    assert_eq!(stats.messages_relayed, 1);
    assert_eq!(relay.client_count().await, 2);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_oversized_message_disconnects_sender() {
    let relay = MetricsRelay::new(RelayConfig {
        max_message_size: 256,
        ..relay_config(10)
    });
    let url = start(&relay).await;

    let mut producer = connect(&url).await;
    let padding = "x".repeat(1024);
    let _ = producer
        .send_text(format!(
            r#"{{"type":"custom","timestamp":1,"metric":{{"name":"{}","value":1}}}}"#,
            padding
        ))
        .await;

    wait_for_clients(&relay, 0).await;
    let next = producer.next_message_timeout(WAIT).await;
    assert!(!matches!(next, Ok(Some(_))));

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_server_broadcast_reaches_all_clients() {
    let relay = MetricsRelay::new(relay_config(10));
    let url = start(&relay).await;

    let mut first = connect(&url).await;
    let mut second = connect(&url).await;

    let update = MetricRecord::network("/api/items", 320.0, 200, 2048).to_update();
    assert_eq!(relay.broadcast(&update).await.unwrap(), 2);

    for client in [&mut first, &mut second] {
        let received = client.next_message_timeout(WAIT).await.unwrap();
        assert_eq!(received, Some(RelayMessage::Metric(update.clone())));
    }

    let aggregates =
        AggregatedMetrics::from_records(&vec![MetricRecord::network("/slow", 800.0, 200, 0)]);
    let alert = Alert::from_threshold(&AlertThreshold::slow_network(100.0), &aggregates);
    assert_eq!(relay.broadcast_alert(&alert).await.unwrap(), 2);

    let received = first.next_message_timeout(WAIT).await.unwrap();
    assert_eq!(received, Some(RelayMessage::Alert(alert)));

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_stop_closes_clients_and_listener() {
    let relay = MetricsRelay::new(relay_config(10));
    let url = start(&relay).await;
    let mut client = connect(&url).await;

    assert_ok!(relay.stop().await);

    assert_eq!(client.next_message_timeout(WAIT).await.unwrap(), None);
    assert_eq!(client.close_info().map(|c| c.code), Some(CLOSE_GOING_AWAY));
    assert_eq!(relay.client_count().await, 0);
    assert!(!relay.is_running().await);

    assert_err!(relay.stop().await);
    assert_err!(RelayClient::connect_with_timeout(&url, WAIT).await);
}

/// ハンドシェイクだけ行い、以後はフレームに応答しないクライアント
async fn silent_client(addr: std::net::SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        response.push(byte[0]);
    }
    assert!(response.starts_with(b"HTTP/1.1 101"));
    stream
}

#[tokio::test]
async fn test_stop_drops_client_that_never_answers_close() {
    let relay = MetricsRelay::new(relay_config(10));
    let addr = relay.start().await.unwrap();
    let mut stream = silent_client(addr, &relay.config().path).await;
    wait_for_clients(&relay, 1).await;

    assert_ok!(relay.stop().await);

    // 受理通知とクローズフレームの後、サーバー側からTCPが閉じられる
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 256];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert_ok!(drained);
    assert_eq!(relay.client_count().await, 0);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let relay = MetricsRelay::new(relay_config(10));
    start(&relay).await;

    assert_err!(relay.start().await);
    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_collector_sink_records_relayed_metrics() {
    let server_collector = quiet_collector();
    let relay = MetricsRelay::with_sink(
        relay_config(10),
        Arc::new(CollectorSink::new(server_collector.clone())),
    );
    let url = start(&relay).await;

    let mut producer = connect(&url).await;
    producer
        .send_metric(&MetricRecord::render("Sidebar", 30.0).to_update())
        .await
        .unwrap();

    wait_for_records(&server_collector, 1).await;
    let metrics = server_collector.get_metrics().await;
    assert_eq!(metrics.renders.component_breakdown["Sidebar"].count, 1);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_bridge_forwards_records_and_alerts_without_echo() {
    let collector = quiet_collector();
    let alerts = AlertManager::default();
    alerts
        .add_threshold(AlertThreshold::slow_network(100.0))
        .await;

    let relay = Arc::new(MetricsRelay::with_sink(
        relay_config(10),
        Arc::new(CollectorSink::new(collector.clone())),
    ));
    let bridge = RelayBridge::attach(relay.clone(), &collector, &alerts);
    let url = start(&relay).await;

    let mut producer = connect(&url).await;
    let mut dashboard = connect(&url).await;

    // クライアント発のメトリクスはダッシュボードへ一度だけ届き、送信元には戻らない
    let remote = MetricRecord::render("Remote", 5.0).to_update();
    producer.send_metric(&remote).await.unwrap();
    assert_eq!(
        dashboard.next_message_timeout(WAIT).await.unwrap(),
        Some(RelayMessage::Metric(remote))
    );
    wait_for_records(&collector, 1).await;
    assert_err!(producer.next_message_timeout(QUIET).await);

    // サーバー側で記録したメトリクスは全員へ
    let local = MetricRecord::network("/slow", 800.0, 200, 0);
    collector.record(local.clone()).await;
    for client in [&mut producer, &mut dashboard] {
        assert_eq!(
            client.next_message_timeout(WAIT).await.unwrap(),
            Some(RelayMessage::Metric(local.to_update()))
        );
    }

    let emitted = alerts.check_metrics(&collector.get_metrics().await).await;
    assert_eq!(emitted.len(), 1);
    match dashboard.next_message_timeout(WAIT).await.unwrap() {
        Some(RelayMessage::Alert(alert)) => assert_eq!(alert.threshold_id, "slow-network"),
        other => panic!("expected alert, got {:?}", other),
    }

    bridge.detach();
    collector.record(MetricRecord::custom("after", 1.0)).await;
    assert_err!(dashboard.next_message_timeout(QUIET).await);

    assert_ok!(relay.stop().await);
}

#[tokio::test]
async fn test_echo_into_records_until_relay_stops() {
    let relay = MetricsRelay::new(relay_config(10));
    let url = start(&relay).await;

    let dashboard_collector = quiet_collector();
    let dashboard = connect(&url).await;
    let echo_collector = dashboard_collector.clone();
    let echo = tokio::spawn(async move { dashboard.echo_into(&echo_collector).await });

    let mut producer = connect(&url).await;
    for i in 0..3 {
        producer
            .send_metric(&MetricRecord::custom("frame", i as f64).to_update())
            .await
            .unwrap();
    }
    producer.send_text("garbage").await.unwrap();

    wait_for_records(&dashboard_collector, 3).await;
    assert_ok!(relay.stop().await);

    let echoed = tokio::time::timeout(WAIT, echo)
        .await
        .expect("echo finished")
        .expect("echo task")
        .unwrap();
    assert_eq!(echoed, 3);
    assert_eq!(
        dashboard_collector.get_metrics().await.custom.by_name["frame"].count,
        3
    );
}
