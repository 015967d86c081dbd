// =============================================================================
// Signal Processor — top-level decision flow for one webhook event
// =============================================================================
//
// One event drives one linear pass: parse -> classify -> read live position
// -> branch into exactly one orchestrator action. The processor holds no
// state between events; the exchange's books are re-queried every time.
//
// Parse and credential failures abort the invocation (500). Calculation and
// order failures stay inside the structured result so the caller sees which
// step failed without the rest of the flow crashing.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::classifier::classify;
use crate::config::Config;
use crate::error::RelayError;
use crate::exchange::{Exchange, Position};
use crate::execution::{ActionOutcome, ExecutionEngine};
use crate::indicators::macd::{macd, map_interval, MacdReading};
use crate::notify::NotifySink;
use crate::scorer::{compute_score, Score};
use crate::signal::SignalData;
use crate::types::{PositionSide, SignalKind};

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// What one invocation returns to the webhook caller. `message` always names
/// the branch that fired (rejected/triggered/updated/ignored) for auditing.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResponse {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
}

impl ProcessResponse {
    fn bare(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            symbol: None,
            alert: None,
            score: None,
            outcome: None,
        }
    }

    fn for_signal(status: u16, message: impl Into<String>, data: &SignalData) -> Self {
        Self {
            status,
            message: message.into(),
            symbol: Some(data.symbol.clone()),
            alert: Some(data.alert.clone()),
            score: None,
            outcome: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Momentum gate
// ---------------------------------------------------------------------------

/// Whether the histogram reading confirms momentum for `side`.
///
/// A sign flip between the previous and latest bar (prev nonzero) always
/// confirms. Otherwise the ratio comparison is asymmetric by side. LONG wants
/// bearish momentum fading or bullish momentum building: a negative sequence
/// whose magnitude shrank below `ratio` of the prior bar, or a positive
/// sequence whose prior bar was below `ratio` of the latest. SHORT flips the
/// comparison direction rather than the signs: a negative sequence confirms
/// while its magnitude stays above `ratio` of the prior bar, a positive
/// sequence while the prior bar stays above `ratio` of the latest.
pub(crate) fn momentum_confirms(reading: &MacdReading, side: PositionSide, ratio: f64) -> bool {
    let h = reading.histogram;
    let p = reading.prev_histogram;

    if p != 0.0 && h.signum() != p.signum() && h != 0.0 {
        return true;
    }

    match side {
        PositionSide::Long => {
            (h < 0.0 && p < 0.0 && h.abs() < ratio * p.abs())
                || (h > 0.0 && p > 0.0 && p.abs() < ratio * h.abs())
        }
        PositionSide::Short => {
            (h < 0.0 && p < 0.0 && h.abs() > ratio * p.abs())
                || (h > 0.0 && p > 0.0 && p.abs() > ratio * h.abs())
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct SignalProcessor {
    exchange: Arc<dyn Exchange>,
    engine: ExecutionEngine,
    notifier: Arc<dyn NotifySink>,
    config: Config,
}

impl SignalProcessor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn NotifySink>,
        config: Config,
    ) -> Self {
        let engine = ExecutionEngine::new(exchange.clone(), config.clone());
        Self {
            exchange,
            engine,
            notifier,
            config,
        }
    }

    /// Process one raw webhook payload end to end.
    #[instrument(skip(self, raw))]
    pub async fn process(&self, raw: &Value) -> ProcessResponse {
        let data = match SignalData::parse(raw) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "payload rejected at parse boundary");
                return ProcessResponse::bare(500, format!("invalid payload: {e}"));
            }
        };

        let classified = classify(&data.alert);
        info!(
            symbol = %data.symbol,
            alert = %data.alert,
            side = ?classified.side,
            kind = ?classified.kind,
            "signal classified"
        );

        let kind = match classified.kind {
            Some(k) => k,
            None => {
                return ProcessResponse::for_signal(
                    200,
                    format!("ignored — unrecognized alert: {}", data.alert),
                    &data,
                );
            }
        };

        let positions = match self.exchange.positions(&data.symbol).await {
            Ok(p) => p,
            Err(e) => return self.error_response(&data, e),
        };

        let open: Vec<&Position> = positions.iter().filter(|p| p.side().is_some()).collect();
        if open.len() > 1 {
            let note = format!(
                "anomaly: {} open position records for {}, using the first",
                open.len(),
                data.symbol
            );
            warn!(symbol = %data.symbol, records = open.len(), "multiple position records");
            self.notifier.notify(&note).await;
        }
        let current = open
            .first()
            .and_then(|p| p.side().map(|s| ((*p).clone(), s)));

        match kind {
            SignalKind::PositionTrigger => {
                let side = match classified.side {
                    Some(s) => s,
                    None => {
                        return ProcessResponse::for_signal(
                            200,
                            "ignored — trigger without a side".to_string(),
                            &data,
                        );
                    }
                };
                self.handle_trigger(&data, side, current).await
            }
            SignalKind::PositionExit => {
                let matching = current
                    .as_ref()
                    .filter(|(_, s)| classified.side.map_or(true, |cs| cs == *s))
                    .is_some();
                if matching {
                    let outcome = self
                        .engine
                        .take_profit_partially(&data.symbol, false)
                        .await;
                    self.action_response(&data, "exit signal — partial take-profit", outcome)
                        .await
                } else {
                    self.ignored_no_position(&data).await
                }
            }
            SignalKind::TpReach => {
                if current.is_some() {
                    let outcome = self.engine.take_profit_partially(&data.symbol, true).await;
                    self.action_response(&data, "tp reached — partial take-profit", outcome)
                        .await
                } else {
                    self.ignored_no_position(&data).await
                }
            }
            SignalKind::SlReach => {
                if current.is_some() {
                    let outcome = self.engine.close_all_symbol_orders(&data.symbol).await;
                    let mut label = "sl reached — closed position".to_string();
                    if let ActionOutcome::Completed(report) = &outcome {
                        if let Some(pnl) = report.realized_pnl {
                            label = format!("sl reached — closed position, realized PnL {pnl:.4} USDT");
                        }
                    }
                    self.action_response(&data, &label, outcome).await
                } else {
                    self.ignored_no_position(&data).await
                }
            }
        }
    }

    /// The trigger branch: update-in-place for a matching position, otherwise
    /// the momentum gate + scorer + open sequence.
    async fn handle_trigger(
        &self,
        data: &SignalData,
        side: PositionSide,
        current: Option<(Position, PositionSide)>,
    ) -> ProcessResponse {
        if let Some((position, held_side)) = &current {
            if *held_side == side {
                return self.update_existing(data, side, position).await;
            }
        }

        // Threshold check first, on the bonus-free score: a signal nobody
        // would accept never costs a kline fetch.
        let base_score = compute_score(data, side, false);
        info!(symbol = %data.symbol, side = %side, score = %base_score, "signal scored");

        if base_score.total < self.config.score_threshold {
            let message = format!(
                "signal rejected: score {} below threshold {}",
                base_score.total, self.config.score_threshold
            );
            self.notifier
                .notify(&format!("{} {} — {}", data.symbol, side, message))
                .await;
            let mut response = ProcessResponse::for_signal(200, message, data);
            response.score = Some(base_score);
            return response;
        }

        let (momentum_confirmed, gate_passed) = if self.config.enable_macd_filter {
            match self.momentum_gate(data, side).await {
                Ok(confirmed) => (confirmed, confirmed),
                Err(e) => return self.error_response(data, e),
            }
        } else {
            (false, true)
        };

        // A confirmed reading still shows up in the reported breakdown.
        let score = if momentum_confirmed {
            compute_score(data, side, true)
        } else {
            base_score
        };

        if !gate_passed {
            // No momentum behind the trigger: flatten instead of opening.
            let outcome = self.engine.close_all_symbol_orders(&data.symbol).await;
            let mut response = self
                .action_response(
                    data,
                    &format!("momentum gate failed — closed exposure instead of opening {side}"),
                    outcome,
                )
                .await;
            response.score = Some(score);
            return response;
        }

        let levels = data
            .indicators
            .sl1
            .zip(data.indicators.tp2)
            .filter(|(sl, tp)| *sl > 0.0 && *tp > 0.0);

        let outcome = self.engine.open_position(&data.symbol, side, levels).await;
        let mut response = self
            .action_response(data, &format!("triggered — opened {side}"), outcome)
            .await;
        response.score = Some(score);
        response
    }

    /// Same-side trigger on an existing position: replace the brackets, never
    /// re-open or resize. Levels come from the alert when it carries them,
    /// otherwise from the percentage-risk math at the current price.
    async fn update_existing(
        &self,
        data: &SignalData,
        side: PositionSide,
        position: &Position,
    ) -> ProcessResponse {
        let levels = data
            .indicators
            .sl1
            .zip(data.indicators.tp2)
            .filter(|(sl, tp)| *sl > 0.0 && *tp > 0.0);

        let (stop_loss, take_profit) = match levels {
            Some(pair) => pair,
            None => match self.derived_protective_levels(&data.symbol, side).await {
                Ok(pair) => pair,
                Err(e) => return self.error_response(data, e),
            },
        };

        let outcome = self
            .engine
            .update_protective_orders(&data.symbol, side, position, stop_loss, take_profit)
            .await;
        self.action_response(
            data,
            &format!("updated protective orders for existing {side}"),
            outcome,
        )
        .await
    }

    /// Fall back to percentage-risk SL/TP around the current market price
    /// when the alert carries no explicit levels.
    async fn derived_protective_levels(
        &self,
        symbol: &str,
        side: PositionSide,
    ) -> Result<(f64, f64), RelayError> {
        let balance = self.exchange.balance().await?;
        let filters = self.exchange.symbol_filters(symbol).await?;
        let market_price = self.exchange.market_price(symbol).await?;
        let params =
            crate::risk::percentage_risk_params(side, balance, market_price, filters, &self.config)?;
        Ok((params.stop_loss, params.take_profit))
    }

    /// Fetch candles and evaluate the momentum gate for `side`.
    async fn momentum_gate(
        &self,
        data: &SignalData,
        side: PositionSide,
    ) -> Result<bool, RelayError> {
        let interval = map_interval(&data.interval_raw);
        let candles = self
            .exchange
            .klines(&data.symbol, interval, self.config.kline_limit)
            .await?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let reading = macd(
            &closes,
            self.config.macd_fast_span,
            self.config.macd_slow_span,
            self.config.macd_signal_span,
        )?;

        let confirmed = momentum_confirms(&reading, side, self.config.macd_delta_ratio);
        info!(
            symbol = %data.symbol,
            side = %side,
            histogram = reading.histogram,
            prev_histogram = reading.prev_histogram,
            confirmed,
            "momentum gate evaluated"
        );
        Ok(confirmed)
    }

    // -------------------------------------------------------------------------
    // Response helpers
    // -------------------------------------------------------------------------

    async fn action_response(
        &self,
        data: &SignalData,
        label: &str,
        outcome: ActionOutcome,
    ) -> ProcessResponse {
        let message = format!("{label}: {outcome}");
        self.notifier
            .notify(&format!("{} — {}", data.symbol, message))
            .await;
        let mut response = ProcessResponse::for_signal(200, message, data);
        response.outcome = Some(outcome);
        response
    }

    async fn ignored_no_position(&self, data: &SignalData) -> ProcessResponse {
        let message = format!("ignored — no position for {}", data.symbol);
        info!(symbol = %data.symbol, "no position for exit-kind signal");
        self.notifier.notify(&message).await;
        ProcessResponse::for_signal(200, message, data)
    }

    fn error_response(&self, data: &SignalData, error: RelayError) -> ProcessResponse {
        let status = if error.is_fatal() { 500 } else { 200 };
        warn!(symbol = %data.symbol, error = %error, "signal processing failed");
        ProcessResponse::for_signal(status, format!("processing failed: {error}"), data)
    }
}

impl std::fmt::Debug for SignalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalProcessor")
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use crate::testutil::MockExchange;
    use serde_json::json;

    fn processor(mock: Arc<MockExchange>, config: Config) -> SignalProcessor {
        SignalProcessor::new(mock, Arc::new(NullNotifier), config)
    }

    fn no_filter_config() -> Config {
        Config {
            enable_macd_filter: false,
            ..Config::default()
        }
    }

    /// Payload that scores the maximum for a LONG candidate: well above
    /// tracer and trail, agreeing trend pair, close to support, green candle
    /// with volume.
    fn strong_long_payload() -> Value {
        json!({
            "alert": "Bullish Confirmation",
            "ticker": "BTCUSDT",
            "interval": "1",
            "time": "1700000000000",
            "ohlcv": {
                "open": 99.0, "high": 101.0, "low": 98.5,
                "close": 100.0, "volume": 1234.0
            },
            "indicators": {
                "smart_trail": 98.0,
                "tracer": 98.0,
                "neo_lead": 101.0,
                "neo_lag": 100.0,
                "rz_s1": 99.6
            }
        })
    }

    /// The reference weak signal: scores 35 for LONG, below any sane
    /// threshold.
    fn weak_doge_payload() -> Value {
        json!({
            "alert": "Bullish Confirmation",
            "ticker": "DOGEUSDT.P",
            "interval": "1",
            "time": "1700000000000",
            "ohlcv": {
                "open": 0.16322, "high": 0.16331, "low": 0.16293,
                "close": 0.16299, "volume": 515854.0
            },
            "indicators": {
                "smart_trail": 0.16441667,
                "tracer": 0.16370033,
                "rz_s1": 0.16241733
            }
        })
    }

    // --- momentum gate unit checks -----------------------------------------

    fn reading(histogram: f64, prev_histogram: f64) -> MacdReading {
        MacdReading {
            macd: 0.0,
            signal: 0.0,
            histogram,
            prev_histogram,
        }
    }

    #[test]
    fn swing_confirms_regardless_of_magnitude() {
        assert!(momentum_confirms(&reading(0.001, -5.0), PositionSide::Long, 0.66));
        assert!(momentum_confirms(&reading(-0.001, 5.0), PositionSide::Short, 0.66));
    }

    #[test]
    fn long_shrinking_negative_confirms() {
        // |h| = 0.5 < 0.66 * |p| = 0.66
        assert!(momentum_confirms(&reading(-0.5, -1.0), PositionSide::Long, 0.66));
        // not shrinking enough
        assert!(!momentum_confirms(&reading(-0.9, -1.0), PositionSide::Long, 0.66));
    }

    #[test]
    fn long_growing_positive_confirms() {
        // p = 0.5 < 0.66 * h = 0.66
        assert!(momentum_confirms(&reading(1.0, 0.5), PositionSide::Long, 0.66));
        assert!(!momentum_confirms(&reading(1.0, 0.9), PositionSide::Long, 0.66));
    }

    #[test]
    fn short_flips_comparison_direction() {
        // Steady negative momentum keeps the SHORT alive: |h| = 1.0 exceeds
        // 0.66 * |p| = 0.66.
        assert!(momentum_confirms(&reading(-1.0, -1.0), PositionSide::Short, 0.66));
        // Growing negative momentum confirms too.
        assert!(momentum_confirms(&reading(-1.0, -0.5), PositionSide::Short, 0.66));
        // A sharply collapsing negative histogram does not: |h| = 0.5 is
        // below 0.66 * |p| = 0.66.
        assert!(!momentum_confirms(&reading(-0.5, -1.0), PositionSide::Short, 0.66));
        // A positive sequence confirms while the prior bar holds up against
        // the latest, i.e. bullish momentum is not accelerating away.
        assert!(momentum_confirms(&reading(0.5, 1.0), PositionSide::Short, 0.66));
        assert!(momentum_confirms(&reading(1.0, 0.9), PositionSide::Short, 0.66));
        assert!(!momentum_confirms(&reading(1.0, 0.5), PositionSide::Short, 0.66));
    }

    #[test]
    fn steady_long_sequence_does_not_confirm_long() {
        // The LONG comparison runs the other way: an unchanged bar never
        // clears a sub-1.0 ratio.
        assert!(!momentum_confirms(&reading(-1.0, -1.0), PositionSide::Long, 0.66));
        assert!(!momentum_confirms(&reading(1.0, 1.0), PositionSide::Long, 0.66));
    }

    #[test]
    fn flat_histogram_never_confirms() {
        assert!(!momentum_confirms(&reading(0.0, 0.0), PositionSide::Long, 0.66));
        assert!(!momentum_confirms(&reading(0.0, 0.0), PositionSide::Short, 0.66));
    }

    // --- end-to-end scenarios ----------------------------------------------

    #[tokio::test]
    async fn below_threshold_is_rejected_with_no_orders() {
        let mock = Arc::new(MockExchange::flat());
        let response = processor(mock.clone(), no_filter_config())
            .process(&weak_doge_payload())
            .await;

        assert_eq!(response.status, 200);
        assert!(response.message.contains("rejected"), "{}", response.message);
        assert_eq!(response.score.unwrap().total, 35);
        assert!(!mock.call_log().iter().any(|c| {
            c.starts_with("market_order")
                || c.starts_with("stop_market_order")
                || c.starts_with("take_profit_market_order")
        }));
    }

    #[tokio::test]
    async fn weak_signal_is_rejected_before_any_kline_fetch() {
        // Filter enabled but no candle history available: the threshold
        // check fires first, so the response says "rejected" instead of
        // surfacing a momentum computation failure.
        let mock = Arc::new(MockExchange::flat());
        let response = processor(mock.clone(), Config::default())
            .process(&weak_doge_payload())
            .await;

        assert_eq!(response.status, 200);
        assert!(response.message.contains("rejected"), "{}", response.message);
        assert!(!mock.call_log().iter().any(|c| c.starts_with("klines")));
    }

    #[tokio::test]
    async fn strong_signal_opens_position() {
        let mock = Arc::new(MockExchange::flat());
        let response = processor(mock.clone(), no_filter_config())
            .process(&strong_long_payload())
            .await;

        assert_eq!(response.status, 200);
        assert!(response.message.contains("opened LONG"), "{}", response.message);
        assert_eq!(response.score.unwrap().total, 100);
        assert!(mock.call_log().iter().any(|c| c.starts_with("market_order BUY")));
    }

    #[tokio::test]
    async fn existing_long_gets_update_only() {
        let mock = Arc::new(MockExchange::with_position(3.0, 100.0));
        let mut payload = strong_long_payload();
        payload["indicators"]["sl1"] = json!(97.0);
        payload["indicators"]["tp2"] = json!(108.0);

        let response = processor(mock.clone(), no_filter_config())
            .process(&payload)
            .await;

        assert!(response.message.contains("updated"), "{}", response.message);
        let calls = mock.call_log();
        assert!(!calls.iter().any(|c| c.starts_with("market_order")));
        assert!(calls.iter().any(|c| c.starts_with("stop_market_order SELL 97")));
        assert!(calls.iter().any(|c| c.starts_with("take_profit_market_order SELL 108")));
    }

    #[tokio::test]
    async fn sl_reached_closes_short_with_pnl() {
        // SHORT 2 @ 100, market 95: pnl = 10 - 0.0005 * 2 * 195 = 9.805
        let mock = Arc::new(MockExchange::with_position(-2.0, 100.0));
        mock.set_price(95.0);

        let payload = json!({
            "alert": "SL1 0.164 Reached",
            "ticker": "BTCUSDT",
            "interval": "1",
            "ohlcv": {"open": 95.0, "high": 96.0, "low": 94.0, "close": 95.0, "volume": 10.0}
        });
        let response = processor(mock.clone(), no_filter_config())
            .process(&payload)
            .await;

        assert!(response.message.contains("PnL"), "{}", response.message);
        match response.outcome {
            Some(ActionOutcome::Completed(report)) => {
                assert!((report.realized_pnl.unwrap() - 9.805).abs() < 1e-9);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(mock.call_log().iter().any(|c| c.starts_with("market_order BUY 2")));
    }

    #[tokio::test]
    async fn exit_with_no_position_is_ignored() {
        let mock = Arc::new(MockExchange::flat());
        let payload = json!({
            "alert": "Bullish Exit",
            "ticker": "BTCUSDT",
            "interval": "1",
            "ohlcv": {"open": 100.0, "high": 101.0, "low": 99.0, "close": 100.0, "volume": 10.0}
        });
        let response = processor(mock.clone(), no_filter_config())
            .process(&payload)
            .await;

        assert!(
            response.message.contains("ignored — no position"),
            "{}",
            response.message
        );
        assert!(!mock.call_log().iter().any(|c| c.starts_with("market_order")));
    }

    #[tokio::test]
    async fn unrecognized_alert_is_ignored() {
        let mock = Arc::new(MockExchange::flat());
        let payload = json!({
            "alert": "Some Random Text",
            "ticker": "BTCUSDT",
            "interval": "1",
            "ohlcv": {"open": 100.0, "high": 101.0, "low": 99.0, "close": 100.0, "volume": 10.0}
        });
        let response = processor(mock, no_filter_config()).process(&payload).await;
        assert_eq!(response.status, 200);
        assert!(response.message.contains("unrecognized"), "{}", response.message);
    }

    #[tokio::test]
    async fn malformed_payload_is_fatal() {
        let mock = Arc::new(MockExchange::flat());
        let response = processor(mock, no_filter_config())
            .process(&json!({"interval": "1"}))
            .await;
        assert_eq!(response.status, 500);
        assert!(response.message.contains("invalid payload"), "{}", response.message);
    }

    #[tokio::test]
    async fn flat_momentum_closes_instead_of_opening() {
        // Strong score (100 without the bonus), but a flat close series gives
        // a zero histogram and the gate refuses the open.
        let mock = Arc::new(MockExchange::flat());
        mock.set_closes(&[100.0; 60]);

        let response = processor(mock.clone(), Config::default())
            .process(&strong_long_payload())
            .await;

        assert!(
            response.message.contains("momentum gate failed"),
            "{}",
            response.message
        );
        assert!(!mock.call_log().iter().any(|c| c.starts_with("market_order")));
    }

    #[tokio::test]
    async fn tp_reach_is_idempotent_on_second_delivery() {
        let mock = Arc::new(MockExchange::with_position(4.0, 100.0));
        mock.set_price(110.0);
        mock.push_filled_order("SELL", 2.0, mock.first_position().update_time + 1);

        let payload = json!({
            "alert": "TP1 110.0 Reached",
            "ticker": "BTCUSDT",
            "interval": "1",
            "ohlcv": {"open": 109.0, "high": 110.5, "low": 108.0, "close": 110.0, "volume": 10.0}
        });
        let response = processor(mock.clone(), no_filter_config())
            .process(&payload)
            .await;

        match response.outcome {
            Some(ActionOutcome::Skipped(reason)) => {
                assert!(reason.contains("already executed"), "{reason}");
            }
            other => panic!("expected Skipped, got {other:?}"),
        }
        assert!(!mock.call_log().iter().any(|c| c.starts_with("market_order")));
    }
}
