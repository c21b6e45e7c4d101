use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// ログファイル名のプレフィックス
const LOG_FILE_PREFIX: &str = "perfmon-rs";

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error) またはEnvFilter書式
    pub level: String,
    /// ログディレクトリ
    pub log_dir: PathBuf,
    /// ファイルローテーション設定
    pub rotation: LogRotation,
    /// ログ保持ポリシー
    pub retention: LogRetention,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// ファイル出力有効
    pub file_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

impl LogRotation {
    /// 設定文字列から解析（不明な値は日次）
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            "never" => LogRotation::Never,
            _ => LogRotation::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRetention {
    /// アプリケーションは削除しない（OS/ログ管理ツール任せ）
    External,
    /// 指定日数後に自動削除
    Days(u32),
    /// 最大ファイル数を保持
    Count(u32),
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            retention: LogRetention::External,
            console_enabled: true,
            file_enabled: false,
        }
    }
}

impl LogConfig {
    /// 設定ファイルのサーバーセクションからログ設定を作成
    pub fn from_server_config(server: &crate::config::ServerSection) -> Self {
        let mut config = Self {
            level: server.log_level.clone(),
            file_enabled: server.log_file,
            rotation: LogRotation::parse(&server.log_rotation),
            ..Self::default()
        };

        if let Some(ref dir) = server.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(days) = server.log_retention_days {
            config.retention = LogRetention::Days(days);
        }

        config
    }

    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_retention(mut self, retention: LogRetention) -> Self {
        self.retention = retention;
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// ファイル出力制御
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }
}

/// ファイル書き込みスレッドのガード
///
/// ドロップすると未書き込みのログをフラッシュして書き込みを停止します。
/// プロセス終了まで保持してください。
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// ログシステムを初期化
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = (config.console_enabled || !config.file_enabled).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true)
            .boxed()
    });

    let mut guard = None;
    let file_layer = if config.file_enabled {
        ensure_log_dir(&config.log_dir)?;
        let file_name = format!("{}.log", LOG_FILE_PREFIX);
        let appender = match config.rotation {
            LogRotation::Daily => rolling::daily(&config.log_dir, &file_name),
            LogRotation::Hourly => rolling::hourly(&config.log_dir, &file_name),
            LogRotation::Never => rolling::never(&config.log_dir, &file_name),
        };
        let (writer, worker) = non_blocking(appender);
        guard = Some(worker);

        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging initialized (level: {})", config.level);
    if config.file_enabled {
        tracing::info!(
            "Log directory: {} ({})",
            config.log_dir.display(),
            format_retention_policy(&config.retention)
        );
        if let Err(e) = apply_retention_policy(config) {
            tracing::warn!("Failed to apply log retention policy: {}", e);
        }
    }

    Ok(LogGuard { _file: guard })
}

/// ログ統計情報を取得
pub fn get_log_stats(log_dir: &Path) -> Result<LogStats> {
    let mut stats = LogStats::default();

    if !log_dir.exists() {
        return Ok(stats);
    }

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        if !is_log_file(&entry.path()) {
            continue;
        }

        let metadata = entry.metadata()?;
        stats.file_count += 1;
        stats.total_size += metadata.len();

        if let Ok(modified) = metadata.modified() {
            if stats.last_modified.map_or(true, |latest| modified > latest) {
                stats.last_modified = Some(modified);
            }
        }
    }

    Ok(stats)
}

#[derive(Debug, Default)]
pub struct LogStats {
    pub file_count: usize,
    pub total_size: u64,
    pub last_modified: Option<std::time::SystemTime>,
}

impl LogStats {
    pub fn format_size(&self) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
        let mut size = self.total_size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

fn format_retention_policy(retention: &LogRetention) -> String {
    match retention {
        LogRetention::External => "retention managed externally".to_string(),
        LogRetention::Days(days) => format!("delete after {} days", days),
        LogRetention::Count(count) => format!("keep newest {} files", count),
    }
}

/// ログ保持ポリシーを適用し、削除したファイル数を返す
fn apply_retention_policy(config: &LogConfig) -> Result<usize> {
    match config.retention {
        LogRetention::External => Ok(0),
        LogRetention::Days(days) => cleanup_old_logs_by_age(&config.log_dir, days),
        LogRetention::Count(count) => cleanup_old_logs_by_count(&config.log_dir, count),
    }
}

/// 更新日時の古い順に並べたログファイル
fn collect_log_files(log_dir: &Path) -> Result<Vec<(PathBuf, std::time::SystemTime)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if is_log_file(&path) {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                files.push((path, modified));
            }
        }
    }
    files.sort_by_key(|(_, modified)| *modified);
    Ok(files)
}

fn remove_log_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed old log file: {}", path.display());
            true
        }
        Err(e) => {
            tracing::warn!("Failed to remove log file {}: {}", path.display(), e);
            false
        }
    }
}

/// 日数ベースでログファイルを削除
fn cleanup_old_logs_by_age(log_dir: &Path, max_days: u32) -> Result<usize> {
    use std::time::{Duration, SystemTime};

    let cutoff = SystemTime::now() - Duration::from_secs(max_days as u64 * 24 * 60 * 60);
    let removed = collect_log_files(log_dir)?
        .into_iter()
        .filter(|(_, modified)| *modified < cutoff)
        .filter(|(path, _)| remove_log_file(path))
        .count();

    if removed > 0 {
        tracing::info!("Removed {} log files older than {} days", removed, max_days);
    }
    Ok(removed)
}

/// ファイル数ベースでログファイルを削除
fn cleanup_old_logs_by_count(log_dir: &Path, max_count: u32) -> Result<usize> {
    let files = collect_log_files(log_dir)?;
    let excess = files.len().saturating_sub(max_count as usize);

    let removed = files
        .into_iter()
        .take(excess)
        .filter(|(path, _)| remove_log_file(path))
        .count();

    if removed > 0 {
        tracing::info!("Removed {} log files beyond the newest {}", removed, max_count);
    }
    Ok(removed)
}

/// ログファイルかどうかを判定
fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with(LOG_FILE_PREFIX) && name.contains(".log"))
        .unwrap_or(false)
}
