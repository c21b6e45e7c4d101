//! Alerts Module
//!
//! 閾値ベースのアラートシステム

mod alert;
mod manager;
mod threshold;

pub use alert::{Alert, AlertSeverity};
pub use manager::{AlertManager, AlertManagerConfig, AlertStats};
pub use threshold::{default_thresholds, AlertThreshold, Condition};
