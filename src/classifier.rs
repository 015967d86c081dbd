// =============================================================================
// Alert classifier — free-text alert to (side, kind, numeric payload)
// =============================================================================
//
// Rules are evaluated in priority order; the first match wins. "Confirmation"
// deliberately beats "Exit" when both keywords appear in one alert — mixed
// alerts from the charting platform must open, not close.
// =============================================================================

use crate::types::{PositionSide, SignalKind};

/// Classification of one alert string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
    pub side: Option<PositionSide>,
    pub kind: Option<SignalKind>,
    /// First parseable number among whitespace-split tokens, if any.
    pub value: Option<f64>,
}

/// Classify a free-text alert.
pub fn classify(alert: &str) -> Classified {
    let value = alert
        .split_whitespace()
        .find_map(|token| token.parse::<f64>().ok());

    let (side, kind) = if alert.contains("Bullish Confirmation") && !alert.contains("Exit") {
        (Some(PositionSide::Long), Some(SignalKind::PositionTrigger))
    } else if alert.contains("Bearish Confirmation") && !alert.contains("Exit") {
        (Some(PositionSide::Short), Some(SignalKind::PositionTrigger))
    } else if alert.contains("Bullish Confirmation") {
        // Mixed signal: confirmation outranks the stray Exit keyword.
        (Some(PositionSide::Long), Some(SignalKind::PositionTrigger))
    } else if alert.contains("Bearish Confirmation") {
        (Some(PositionSide::Short), Some(SignalKind::PositionTrigger))
    } else if alert.contains("Bullish Exit") {
        (Some(PositionSide::Long), Some(SignalKind::PositionExit))
    } else if alert.contains("Bearish Exit") {
        (Some(PositionSide::Short), Some(SignalKind::PositionExit))
    } else if (alert.contains("TP1") || alert.contains("TP2")) && alert.contains("Reached") {
        (None, Some(SignalKind::TpReach))
    } else if (alert.contains("SL1") || alert.contains("SL2")) && alert.contains("Reached") {
        (None, Some(SignalKind::SlReach))
    } else {
        (None, None)
    };

    Classified { side, kind, value }
}
