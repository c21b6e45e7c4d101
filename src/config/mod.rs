//! 設定管理
//!
//! 既定値 → 設定ファイル → 環境変数 → コマンドライン の順に上書きします。

pub mod loader;
pub mod types;

pub use loader::{CliOverrides, ConfigLoader, ENV_PREFIX};
pub use types::{PerfmonConfig, ServerSection, ThresholdsSection};

use anyhow::{Context, Result};
use std::path::Path;

/// 既定のサンプル設定ファイル名
pub const SAMPLE_CONFIG_FILE: &str = "perfmon.toml.example";

/// 既定値を書き出したサンプル設定の内容
pub fn sample_config() -> Result<String> {
    let toml_content = toml::to_string_pretty(&PerfmonConfig::default())
        .context("Failed to serialize default configuration")?;

    Ok(format!(
        r#"# perfmon-rs configuration
#
# perfmon.toml または config/perfmon.toml として保存してください。
# 環境変数での上書きも可能です (例: {prefix}__RELAY__PORT=4000)

{toml_content}
# [server]
# log_level = ログレベル (trace, debug, info, warn, error) またはEnvFilter書式
# log_file = true でログディレクトリにローテーションファイルを出力
#
# [collector]
# buffer_size = 保持するレコード数の上限（古いものから削除）
# memory_interval_ms = メモリ計測間隔
#
# [alerts]
# max_alert_history = 保持するアラート数の上限
# check_interval_ms = 閾値評価の間隔
#
# [relay]
# max_clients = 同時接続の上限（超過時はクローズコード1013で拒否）
"#,
        prefix = ENV_PREFIX,
    ))
}

/// サンプル設定ファイルを生成
pub fn generate_sample_config(path: &Path) -> Result<()> {
    std::fs::write(path, sample_config()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
