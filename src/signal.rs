// =============================================================================
// SignalData — validated snapshot of one webhook event
// =============================================================================
//
// The webhook body arrives either as a JSON object or as a JSON-encoded
// string, optionally wrapped in a `{"body": ...}` envelope. Alerting platforms
// send numeric fields inconsistently (sometimes numbers, sometimes quoted
// strings), so every numeric read accepts both.
//
// `alert` and `ticker` are required; missing either is a ParseError. Indicator
// fields are tagged optionals — absent means absent, never zero.
// =============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::RelayError;

/// Indicator bundle attached to an alert. Every field is optional; the
/// charting side only sends what the active overlay computes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSet {
    pub smart_trail: Option<f64>,
    pub rz_r1: Option<f64>,
    pub rz_r2: Option<f64>,
    pub rz_r3: Option<f64>,
    pub rz_s1: Option<f64>,
    pub rz_s2: Option<f64>,
    pub rz_s3: Option<f64>,
    pub catcher: Option<f64>,
    pub tracer: Option<f64>,
    pub neo_lead: Option<f64>,
    pub neo_lag: Option<f64>,
    pub tp1: Option<f64>,
    pub sl1: Option<f64>,
    pub tp2: Option<f64>,
    pub sl2: Option<f64>,
}

/// Immutable snapshot of one inbound webhook event.
#[derive(Debug, Clone, Serialize)]
pub struct SignalData {
    pub alert: String,
    pub symbol: String,
    /// Raw interval code as sent by the alerting platform ("1", "60", "D").
    pub interval_raw: String,
    /// Display timeframe echoed back in responses.
    pub tf: String,
    /// Bar timestamp passthrough (milliseconds as sent, unvalidated).
    pub bartime: String,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    pub indicators: IndicatorSet,
}

impl SignalData {
    /// Parse a raw webhook payload into a `SignalData`.
    ///
    /// Accepts a JSON object, a JSON-encoded string, or either of those
    /// wrapped in a `{"body": ...}` envelope.
    pub fn parse(raw: &Value) -> Result<Self, RelayError> {
        let value = unwrap_payload(raw)?;
        let body = value
            .as_object()
            .ok_or_else(|| RelayError::Parse("payload is not a JSON object".to_string()))?;

        let alert = read_string(body, "alert")
            .ok_or_else(|| RelayError::Parse("missing required field 'alert'".to_string()))?;
        let symbol = read_string(body, "ticker")
            .ok_or_else(|| RelayError::Parse("missing required field 'ticker'".to_string()))?;

        let interval_raw = read_string(body, "interval").unwrap_or_else(|| "1".to_string());
        let tf = read_string(body, "tf").unwrap_or_default();
        let bartime = read_string(body, "bartime").unwrap_or_default();

        let ohlcv = body.get("ohlcv").and_then(Value::as_object);
        let num = |key: &str| {
            ohlcv
                .and_then(|m| m.get(key))
                .and_then(flexible_f64)
                .unwrap_or(0.0)
        };

        let ind = body.get("indicators").and_then(Value::as_object);
        let opt = |key: &str| ind.and_then(|m| m.get(key)).and_then(flexible_f64);

        Ok(Self {
            alert,
            symbol,
            interval_raw,
            tf,
            bartime,
            open: num("open"),
            high: num("high"),
            low: num("low"),
            close: num("close"),
            volume: num("volume"),
            indicators: IndicatorSet {
                smart_trail: opt("smart_trail"),
                rz_r1: opt("rz_r1"),
                rz_r2: opt("rz_r2"),
                rz_r3: opt("rz_r3"),
                rz_s1: opt("rz_s1"),
                rz_s2: opt("rz_s2"),
                rz_s3: opt("rz_s3"),
                catcher: opt("catcher"),
                tracer: opt("tracer"),
                neo_lead: opt("neo_lead"),
                neo_lag: opt("neo_lag"),
                tp1: opt("tp1"),
                sl1: opt("sl1"),
                tp2: opt("tp2"),
                sl2: opt("sl2"),
            },
        })
    }
}

/// Peel the `{"body": ...}` envelope and decode string-encoded JSON.
fn unwrap_payload(raw: &Value) -> Result<Value, RelayError> {
    let inner = match raw.get("body") {
        Some(body) => body.clone(),
        None => raw.clone(),
    };

    match inner {
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| RelayError::Parse(format!("payload string is not valid JSON: {e}"))),
        other => Ok(other),
    }
}

fn read_string(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a JSON value that may be either a string or a number as `f64`.
fn flexible_f64(val: &Value) -> Option<f64> {
    match val {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
