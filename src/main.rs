//! perfmon-rs binary entry point
//!
//! メトリクスリレーを起動し、自プロセスのメモリ計測と閾値アラートを
//! 接続中のダッシュボードへ配信します。

use anyhow::Result;
use clap::Parser;
use perfmon_rs::config::{generate_sample_config, CliOverrides, ConfigLoader, SAMPLE_CONFIG_FILE};
use perfmon_rs::logging::{init_logging, LogConfig};
use perfmon_rs::monitoring::{AlertManager, AlertMonitor, MetricsCollector};
use perfmon_rs::transport::websocket::{CollectorSink, MetricsRelay, RelayBridge};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "perfmon-rs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 設定ファイルのパス（省略時は perfmon.toml / config/perfmon.toml）
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// リレーの待ち受けポート
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// ログレベル (trace, debug, info, warn, error)
    #[arg(long, short = 'l', env = "PERFMON_LOG")]
    log_level: Option<String>,

    /// サンプル設定ファイルを生成して終了
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = SAMPLE_CONFIG_FILE)]
    generate_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = args.generate_config {
        generate_sample_config(&path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let config = ConfigLoader::new()
        .load_from_file(args.config.as_deref())
        .load_from_env()
        .load_from_cli(CliOverrides {
            port: args.port,
            log_level: args.log_level,
        })
        .build()?;

    let _log_guard = init_logging(&LogConfig::from_server_config(&config.server))?;

    let collector = MetricsCollector::new(config.collector.clone());
    let alerts = AlertManager::new(config.alerts.clone());
    alerts.add_thresholds(config.thresholds.to_thresholds()).await;

    let relay = Arc::new(MetricsRelay::with_sink(
        config.relay.clone(),
        Arc::new(CollectorSink::new(collector.clone())),
    ));
    let bridge = RelayBridge::attach(relay.clone(), &collector, &alerts);

    let addr = relay.start().await?;
    info!("Dashboards can connect to ws://{}{}", addr, config.relay.path);

    collector.start_default_memory_tracking();
    let monitor = AlertMonitor::new(collector.clone(), alerts.clone());
    monitor.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    monitor.stop();
    collector.stop_memory_tracking();
    bridge.detach();

    let stats = relay.statistics().await;
    if let Err(e) = relay.stop().await {
        warn!("Relay did not stop cleanly: {}", e);
    }

    let alert_stats = alerts.get_stats().await;
    info!(
        "Relayed {} messages over {} connections ({} rejected, {} invalid); {} alerts raised",
        stats.messages_relayed,
        stats.total_connections,
        stats.rejected_connections,
        stats.invalid_messages,
        alert_stats.total_count
    );

    Ok(())
}
