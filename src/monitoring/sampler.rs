//! メモリサンプラー
//!
//! 定期メモリ計測の取得元。既定はsysinfoによるプロセス常駐メモリです。

use super::metrics::{now_millis, MemoryMetric};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// メモリ計測の取得元
pub trait MemorySampler: Send + 'static {
    /// 現在のメモリ使用量を取得（取得できない場合は `None`）
    fn sample(&mut self) -> Option<MemoryMetric>;
}

/// sysinfoベースのサンプラー
///
/// `used_bytes` はこのプロセスの常駐メモリ、`total_bytes` はシステム全体のメモリです。
pub struct SysinfoSampler {
    sys: System,
    pid: Pid,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        Self { sys, pid }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self) -> Option<MemoryMetric> {
        self.sys.refresh_memory();
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = self.sys.process(self.pid)?;

        Some(MemoryMetric {
            used_bytes: process.memory(),
            total_bytes: self.sys.total_memory(),
            timestamp: now_millis(),
        })
    }
}

/// 固定値を返すサンプラー（テスト・デモ用）
#[derive(Debug, Clone)]
pub struct FixedSampler {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySampler for FixedSampler {
    fn sample(&mut self) -> Option<MemoryMetric> {
        Some(MemoryMetric {
            used_bytes: self.used_bytes,
            total_bytes: self.total_bytes,
            timestamp: now_millis(),
        })
    }
}
