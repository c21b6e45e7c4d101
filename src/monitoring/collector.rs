//! メトリクス収集システム
//!
//! 固定長リングバッファにレコードを保持し、集計は `get_metrics()` 呼び出し時に計算します。

use super::aggregate::AggregatedMetrics;
use super::metrics::MetricRecord;
use super::sampler::{MemorySampler, SysinfoSampler};
use super::subscription::{SubscriberRegistry, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// メトリクス収集設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// リングバッファ容量
    pub buffer_size: usize,
    /// メモリ計測間隔（ミリ秒）
    pub memory_interval_ms: u64,
    /// 起動時に記録を有効化
    pub enabled: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            memory_interval_ms: 5000,
            enabled: true,
        }
    }
}

impl CollectorConfig {
    /// メモリ計測間隔
    pub fn memory_interval(&self) -> Duration {
        Duration::from_millis(self.memory_interval_ms)
    }
}

type SharedSampler = Arc<Mutex<Box<dyn MemorySampler>>>;

/// メトリクス収集器
///
/// `Clone` は同じバッファを共有するハンドルを返します。
/// `disable()` はメモリ計測タスクを停止し、購読者とバッファをクリアします。
#[derive(Clone)]
pub struct MetricsCollector {
    config: CollectorConfig,
    buffer: Arc<RwLock<VecDeque<MetricRecord>>>,
    enabled: Arc<AtomicBool>,
    listeners: SubscriberRegistry<MetricRecord>,
    sampler: SharedSampler,
    memory_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(CollectorConfig::default())
    }
}

impl MetricsCollector {
    /// 新しいコレクターを作成
    pub fn new(config: CollectorConfig) -> Self {
        Self::with_sampler(config, SysinfoSampler::new())
    }

    /// メモリサンプラーを指定して作成
    pub fn with_sampler(config: CollectorConfig, sampler: impl MemorySampler) -> Self {
        let capacity = config.buffer_size.max(1);
        let enabled = config.enabled;
        Self {
            config,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            enabled: Arc::new(AtomicBool::new(enabled)),
            listeners: SubscriberRegistry::new(),
            sampler: Arc::new(Mutex::new(Box::new(sampler))),
            memory_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// バッファ容量
    pub fn capacity(&self) -> usize {
        self.config.buffer_size.max(1)
    }

    /// メトリクスを記録
    ///
    /// 無効化中は何もしません。容量を超えた場合は最も古いレコードを削除します。
    pub async fn record(&self, metric: MetricRecord) {
        if self.push(metric.clone()).await {
            self.listeners.notify(&metric);
        }
    }

    /// 購読者に通知せずにバッファへ追加
    ///
    /// リレー経由で受信済み（配信済み）のメトリクスを取り込む場合に使います。
    pub async fn ingest(&self, metric: MetricRecord) {
        self.push(metric).await;
    }

    async fn push(&self, metric: MetricRecord) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let mut buffer = self.buffer.write().await;
        buffer.push_back(metric);
        while buffer.len() > self.capacity() {
            buffer.pop_front();
        }
        true
    }

    /// レンダー計測を開始
    pub fn track_render(&self, component_id: impl Into<String>) -> RenderTimer {
        RenderTimer {
            collector: self.clone(),
            component_id: component_id.into(),
            started_at: Instant::now(),
        }
    }

    /// 集計メトリクスを取得
    pub async fn get_metrics(&self) -> AggregatedMetrics {
        let buffer = self.buffer.read().await;
        AggregatedMetrics::from_records(buffer.iter())
    }

    /// バッファ内容を古い順に取得
    pub async fn get_records(&self) -> Vec<MetricRecord> {
        let buffer = self.buffer.read().await;
        buffer.iter().cloned().collect()
    }

    /// バッファ内のレコード数
    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// バッファをクリア
    pub async fn clear(&self) {
        self.buffer.write().await.clear();
    }

    /// 記録されたレコードを購読
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MetricRecord) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    /// 定期メモリ計測を開始
    ///
    /// 既に実行中の場合は既存のタスクを停止してから開始します。
    pub fn start_memory_tracking(&self, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let mut slot = self.memory_slot();
        if let Some(handle) = slot.take() {
            handle.abort();
        }

        let collector = self.clone();
        let sampler = self.sampler.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let sample = {
                    let mut sampler = sampler.lock().unwrap_or_else(PoisonError::into_inner);
                    sampler.sample()
                };

                match sample {
                    Some(metric) => collector.record(MetricRecord::Memory(metric)).await,
                    None => debug!("Memory sample unavailable"),
                }
            }
        }));

        info!("Memory tracking started (interval: {:?})", period);
    }

    /// 設定の間隔で定期メモリ計測を開始
    pub fn start_default_memory_tracking(&self) {
        self.start_memory_tracking(self.config.memory_interval());
    }

    /// 定期メモリ計測を停止（実行中だった場合は `true`）
    pub fn stop_memory_tracking(&self) -> bool {
        match self.memory_slot().take() {
            Some(handle) => {
                handle.abort();
                info!("Memory tracking stopped");
                true
            }
            None => false,
        }
    }

    /// 定期メモリ計測が実行中か
    pub fn is_memory_tracking(&self) -> bool {
        self.memory_slot()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 記録が有効か
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 記録を再開
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// 記録を停止し、タイマー・購読者・バッファをクリア
    pub async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.stop_memory_tracking();
        self.listeners.clear();
        self.clear().await;
        info!("Metrics collector disabled");
    }

    fn memory_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.memory_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// レンダー計測タイマー
///
/// `end()` は呼ぶたびにレコードを追加します（二重呼び出しは呼び出し側の責任）。
pub struct RenderTimer {
    collector: MetricsCollector,
    component_id: String,
    started_at: Instant,
}

impl RenderTimer {
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// 開始からの経過時間（ミリ秒）
    pub fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    /// 計測を終了して記録し、経過時間（ミリ秒）を返す
    pub async fn end(&self) -> f64 {
        let duration_ms = self.elapsed_ms();
        self.collector
            .record(MetricRecord::render(self.component_id.clone(), duration_ms))
            .await;
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sampler::FixedSampler;
    use std::sync::atomic::AtomicUsize;

    fn collector_with_capacity(buffer_size: usize) -> MetricsCollector {
        MetricsCollector::with_sampler(
            CollectorConfig {
                buffer_size,
                ..Default::default()
            },
            FixedSampler {
                used_bytes: 64 * 1024 * 1024,
                total_bytes: 1024 * 1024 * 1024,
            },
        )
    }

    #[tokio::test]
    async fn test_buffer_keeps_most_recent_records() {
        let collector = collector_with_capacity(5);

        for i in 0..12 {
            collector.record(MetricRecord::custom("seq", i as f64)).await;
        }

        let values: Vec<f64> = collector
            .get_records()
            .await
            .into_iter()
            .map(|record| match record {
                MetricRecord::Custom(m) => m.value,
                other => panic!("unexpected record: {:?}", other),
            })
            .collect();

        assert_eq!(values, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[tokio::test]
    async fn test_get_metrics_does_not_mutate_buffer() {
        let collector = collector_with_capacity(10);
        collector.record(MetricRecord::render("X", 10.0)).await;

        let first = collector.get_metrics().await;
        let second = collector.get_metrics().await;

        assert_eq!(first.renders, second.renders);
        assert_eq!(collector.len().await, 1);
    }

    #[tokio::test]
    async fn test_track_render_records_each_end() {
        let collector = collector_with_capacity(10);
        let timer = collector.track_render("List");

        let duration = timer.end().await;
        timer.end().await;

        assert!(duration >= 0.0);
        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.renders.component_breakdown["List"].count, 2);
    }

    #[tokio::test]
    async fn test_disabled_collector_ignores_records() {
        let collector = collector_with_capacity(10);
        collector.record(MetricRecord::render("X", 1.0)).await;

        collector.disable().await;
        collector.record(MetricRecord::render("X", 2.0)).await;
        assert!(collector.is_empty().await);

        collector.enable();
        collector.record(MetricRecord::render("X", 3.0)).await;
        assert_eq!(collector.len().await, 1);
    }

    #[tokio::test]
    async fn test_listeners_receive_records_until_disable() {
        let collector = collector_with_capacity(10);
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let _subscription = collector.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        collector.record(MetricRecord::custom("a", 1.0)).await;
        collector.disable().await;
        collector.enable();
        collector.record(MetricRecord::custom("a", 2.0)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ingest_skips_listeners() {
        let collector = collector_with_capacity(10);
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let _subscription = collector.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        collector.ingest(MetricRecord::custom("remote", 1.0)).await;

        assert_eq!(collector.len().await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_memory_tracking_start_stop() {
        let collector = collector_with_capacity(100);

        collector.start_memory_tracking(Duration::from_millis(10));
        collector.start_memory_tracking(Duration::from_millis(10));
        assert!(collector.is_memory_tracking());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(collector.stop_memory_tracking());
        assert!(!collector.is_memory_tracking());
        assert!(!collector.stop_memory_tracking());

        let recorded = collector.get_metrics().await.memory.count;
        assert!(recorded >= 2, "expected samples, got {}", recorded);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(collector.get_metrics().await.memory.count, recorded);
    }

    #[tokio::test]
    async fn test_disable_stops_memory_tracking() {
        let collector = collector_with_capacity(100);
        collector.start_memory_tracking(Duration::from_millis(5));

        collector.disable().await;

        assert!(!collector.is_memory_tracking());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(collector.is_empty().await);
    }
}
