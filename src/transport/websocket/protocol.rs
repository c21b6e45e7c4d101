//! リレーのワイヤープロトコル
//!
//! すべてのメッセージはトップレベルに `type` を持つJSONテキストフレームです。
//!
//! - `{"type":"connected"}`: 接続受理時にサーバーが送信
//! - `{"type":"render"|"memory"|"network"|"custom","timestamp":..,"metric":{..}}`: メトリクス更新
//! - `{"type":"alert","alert":{..}}`: サーバーが発行したアラート

use crate::error::{Error, Result};
use crate::monitoring::{Alert, MetricKind, MetricsUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 上限超過で拒否する際のクローズコード（Try Again Later）
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// 上限超過で拒否する際のクローズ理由
pub const MAX_CLIENTS_REASON: &str = "Maximum number of clients reached";

/// サーバー停止時のクローズコード（Going Away）
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub const SHUTDOWN_REASON: &str = "Server shutting down";

const CONNECTED_TYPE: &str = "connected";
const ALERT_TYPE: &str = "alert";

/// リレーで流れるメッセージ
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// 接続受理通知
    Connected,
    /// メトリクス更新
    Metric(MetricsUpdate),
    /// アラート通知
    Alert(Alert),
}

#[derive(Serialize)]
struct AlertEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    alert: &'a Alert,
}

#[derive(Deserialize)]
struct OwnedAlertEnvelope {
    alert: Alert,
}

impl RelayMessage {
    /// JSONテキストに変換
    pub fn to_json(&self) -> Result<String> {
        let text = match self {
            RelayMessage::Connected => serde_json::json!({ "type": CONNECTED_TYPE }).to_string(),
            RelayMessage::Metric(update) => serde_json::to_string(update)?,
            RelayMessage::Alert(alert) => serde_json::to_string(&AlertEnvelope {
                kind: ALERT_TYPE,
                alert,
            })?,
        };
        Ok(text)
    }

    /// サーバーから受信したテキストを解析
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::InvalidMessage(format!("not valid JSON: {}", e)))?;

        match value.get("type").and_then(Value::as_str) {
            Some(CONNECTED_TYPE) => Ok(RelayMessage::Connected),
            Some(ALERT_TYPE) => {
                let envelope: OwnedAlertEnvelope = serde_json::from_value(value)
                    .map_err(|e| Error::InvalidMessage(format!("malformed alert: {}", e)))?;
                Ok(RelayMessage::Alert(envelope.alert))
            }
            _ => validate_value(value).map(RelayMessage::Metric),
        }
    }
}

/// クライアントから受信したメトリクスメッセージを検証
///
/// JSONオブジェクトであること、`type` が既知の種別であること、
/// `timestamp` が数値であること、`metric` が非nullのオブジェクトであることを確認します。
/// `metric` の中身は検証しません。
pub fn validate_inbound(text: &str) -> Result<MetricsUpdate> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::InvalidMessage(format!("not valid JSON: {}", e)))?;
    validate_value(value)
}

fn validate_value(mut value: Value) -> Result<MetricsUpdate> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| Error::InvalidMessage("message must be a JSON object".to_string()))?;

    let kind = match object.get("type") {
        Some(Value::String(name)) => MetricKind::parse(name)
            .ok_or_else(|| Error::InvalidMessage(format!("unknown metric type '{}'", name)))?,
        Some(_) => {
            return Err(Error::InvalidMessage(
                "'type' must be a string".to_string(),
            ))
        }
        None => return Err(Error::InvalidMessage("missing 'type'".to_string())),
    };

    let timestamp = object
        .get("timestamp")
        .and_then(|ts| ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64)))
        .ok_or_else(|| Error::InvalidMessage("'timestamp' must be a number".to_string()))?;

    let metric = match object.remove("metric") {
        Some(metric @ Value::Object(_)) => metric,
        _ => {
            return Err(Error::InvalidMessage(
                "'metric' must be a non-null object".to_string(),
            ))
        }
    };

    Ok(MetricsUpdate {
        kind,
        timestamp,
        metric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{AggregatedMetrics, AlertThreshold, MetricRecord};

    #[test]
    fn test_validate_accepts_known_types() {
        let update = validate_inbound(
            r#"{"type":"render","timestamp":1700000000000,"metric":{"componentId":"A","durationMs":3.5}}"#,
        )
        .unwrap();

        assert_eq!(update.kind, MetricKind::Render);
        assert_eq!(update.timestamp, 1_700_000_000_000);
        assert_eq!(update.metric["componentId"], "A");
    }

    #[test]
    fn test_validate_accepts_fractional_timestamp() {
        let update =
            validate_inbound(r#"{"type":"custom","timestamp":12.9,"metric":{"name":"x"}}"#)
                .unwrap();
        assert_eq!(update.timestamp, 12);
    }

    #[test]
    fn test_validate_rejects_malformed_messages() {
        let cases = [
            "not json",
            "[1,2,3]",
            r#"{"timestamp":1,"metric":{}}"#,
            r#"{"type":"cpu","timestamp":1,"metric":{}}"#,
            r#"{"type":7,"timestamp":1,"metric":{}}"#,
            r#"{"type":"render","timestamp":"now","metric":{}}"#,
            r#"{"type":"render","metric":{}}"#,
            r#"{"type":"render","timestamp":1,"metric":null}"#,
            r#"{"type":"render","timestamp":1,"metric":[1]}"#,
            r#"{"type":"render","timestamp":1}"#,
        ];

        for case in cases {
            let err = validate_inbound(case).unwrap_err();
            assert!(err.is_validation(), "{} -> {}", case, err);
        }
    }

    #[test]
    fn test_connected_message_shape() {
        let text = RelayMessage::Connected.to_json().unwrap();
        assert_eq!(text, r#"{"type":"connected"}"#);
        assert_eq!(RelayMessage::parse(&text).unwrap(), RelayMessage::Connected);
    }

    #[test]
    fn test_metric_message_matches_inbound_shape() {
        let update = MetricRecord::network("/api", 120.0, 503, 10).to_update();
        let text = RelayMessage::Metric(update.clone()).to_json().unwrap();

        assert_eq!(validate_inbound(&text).unwrap(), update);
    }

    #[test]
    fn test_alert_message_parses_back() {
        let aggregates = AggregatedMetrics::from_records(&vec![
            MetricRecord::network("/a", 10.0, 500, 0),
            MetricRecord::network("/a", 10.0, 200, 0),
        ]);
        let alert = Alert::from_threshold(&AlertThreshold::high_error_rate(5.0), &aggregates);

        let text = RelayMessage::Alert(alert.clone()).to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "alert");
        assert_eq!(value["alert"]["thresholdId"], alert.threshold_id.as_str());

        assert_eq!(RelayMessage::parse(&text).unwrap(), RelayMessage::Alert(alert));
    }
}
