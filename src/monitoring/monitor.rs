//! 定期アラート評価
//!
//! コレクターの集計を一定間隔でアラートマネージャーに渡します。
//! レベルトリガーのアラート発行レートはこの間隔で制限されます。

use super::alerts::{Alert, AlertManager};
use super::collector::MetricsCollector;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// 定期アラートモニター
#[derive(Clone)]
pub struct AlertMonitor {
    collector: MetricsCollector,
    alerts: AlertManager,
    period: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AlertMonitor {
    /// アラートマネージャー設定の間隔で作成
    pub fn new(collector: MetricsCollector, alerts: AlertManager) -> Self {
        let period = alerts.config().check_interval();
        Self::with_interval(collector, alerts, period)
    }

    /// 間隔を指定して作成
    pub fn with_interval(collector: MetricsCollector, alerts: AlertManager, period: Duration) -> Self {
        Self {
            collector,
            alerts,
            period: period.max(Duration::from_millis(1)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.period
    }

    /// 即座に1回評価
    pub async fn check_now(&self) -> Vec<Alert> {
        let aggregates = self.collector.get_metrics().await;
        let alerts = self.alerts.check_metrics(&aggregates).await;
        debug!(
            "Alert check over {} records emitted {} alerts",
            aggregates.total_records,
            alerts.len()
        );
        alerts
    }

    /// 定期評価を開始（実行中なら再起動）
    pub fn start(&self) {
        let mut slot = self.slot();
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let monitor = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(monitor.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 初回の即時tickは読み捨てる
            ticker.tick().await;

            loop {
                ticker.tick().await;
                monitor.check_now().await;
            }
        }));

        info!("Alert monitor started (interval: {:?})", self.period);
    }

    /// 定期評価を停止（実行中だった場合は `true`）
    pub fn stop(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                handle.abort();
                info!("Alert monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
