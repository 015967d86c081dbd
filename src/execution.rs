// =============================================================================
// Execution Engine — sequences exchange calls for each order action
// =============================================================================
//
// Invariants upheld on every path:
//   * "cancel orders" precedes "place new orders" for the same symbol.
//   * "close opposing side" precedes "open new side".
//   * A failed entry market order aborts before any protective order is
//     placed — no orphaned SL/TP without a position.
//   * SL/TP placement failures after a filled entry are reported step by
//     step, never rolled back and never hidden.
//
// The engine never retries; redelivery is the webhook caller's concern.
// =============================================================================

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::exchange::{Exchange, Position};
use crate::risk::{explicit_level_params, percentage_risk_params, round_to, TradeParams};
use crate::types::PositionSide;

/// Fraction of the position closed by a partial take-profit.
const PARTIAL_CLOSE_FRACTION: f64 = 0.5;

/// How far beyond the current price the replacement take-profit is pushed,
/// as a multiple of the entry-to-market distance. A heuristic, not a
/// guarantee.
const TP_EXTENSION_MULTIPLIER: f64 = 2.0;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Per-action report of what actually reached the exchange.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_order_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_order_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_order_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investment_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    /// Step-level failures that did not abort the action (e.g. a rejected
    /// protective order after a filled entry).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Outcome of one orchestrator action.
#[derive(Debug, Clone, Serialize)]
pub enum ActionOutcome {
    /// The action reached the exchange; the report says what happened.
    Completed(OrderReport),
    /// Nothing needed doing (no position, already executed, ...).
    Skipped(String),
    /// The action could not execute at all.
    Failed(String),
}

impl ActionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed(report) => {
                if report.notes.is_empty() {
                    write!(f, "completed")
                } else {
                    write!(f, "completed with issues: {}", report.notes.join("; "))
                }
            }
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sequences the exchange calls behind every order action. Holds no state of
/// its own; the exchange's books are the only state.
pub struct ExecutionEngine {
    exchange: Arc<dyn Exchange>,
    config: Config,
}

impl ExecutionEngine {
    pub fn new(exchange: Arc<dyn Exchange>, config: Config) -> Self {
        Self { exchange, config }
    }

    // -------------------------------------------------------------------------
    // clear_orders
    // -------------------------------------------------------------------------

    /// Cancel every open order for `symbol`.
    pub async fn clear_orders(&self, symbol: &str) -> ActionOutcome {
        match self.exchange.cancel_all_orders(symbol).await {
            Ok(()) => {
                debug!(symbol, "open orders cleared");
                ActionOutcome::Completed(OrderReport::default())
            }
            Err(e) => {
                warn!(symbol, error = %e, "failed to clear orders");
                ActionOutcome::Failed(e.to_string())
            }
        }
    }

    // -------------------------------------------------------------------------
    // open_position
    // -------------------------------------------------------------------------

    /// Open a new position with attached bracket orders.
    ///
    /// `levels` carries the alert's own (stop_loss, take_profit) prices when
    /// present; otherwise SL/TP are derived from the percentage-risk math.
    pub async fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        levels: Option<(f64, f64)>,
    ) -> ActionOutcome {
        let mut notes = Vec::new();

        // Stale orders go first, then opposing exposure.
        if let ActionOutcome::Failed(e) = self.clear_orders(symbol).await {
            notes.push(format!("pre-open cancel failed: {e}"));
        }

        match self.close_side(symbol, side.opposite()).await {
            Ok(Some(pnl)) => {
                info!(symbol, opposing = %side.opposite(), pnl, "opposing position closed");
            }
            Ok(None) => {}
            Err(e) => {
                // An unclosed opposing position would make the exchange
                // reject the new entry; this is fatal for the action.
                return ActionOutcome::Failed(format!("failed to close opposing side: {e}"));
            }
        }

        let params = match self.compute_entry_params(symbol, side, levels).await {
            Ok(p) => p,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };

        if let Err(e) = self.exchange.set_leverage(symbol, self.config.leverage).await {
            warn!(symbol, error = %e, "leverage change rejected");
            notes.push(format!("set_leverage failed: {e}"));
        }

        let entry = match self
            .exchange
            .market_order(symbol, side.entry_order_side(), params.quantity)
            .await
        {
            Ok(ack) => ack,
            // No position means no protective orders: abort here.
            Err(e) => return ActionOutcome::Failed(format!("entry order rejected: {e}")),
        };

        info!(
            symbol,
            side = %side,
            quantity = params.quantity,
            order_id = entry.order_id,
            "entry market order filled"
        );

        let mut report = OrderReport {
            entry_order_id: Some(entry.order_id),
            quantity: Some(params.quantity),
            stop_loss_price: Some(params.stop_loss),
            take_profit_price: Some(params.take_profit),
            market_price: Some(params.market_price),
            investment_amount: Some(params.investment_amount),
            notes,
            ..OrderReport::default()
        };

        match self
            .exchange
            .stop_market_order(
                symbol,
                side.exit_order_side(),
                params.stop_loss,
                params.quantity,
            )
            .await
        {
            Ok(ack) => report.stop_loss_order_id = Some(ack.order_id),
            Err(e) => {
                warn!(symbol, error = %e, "stop-loss placement failed after entry");
                report.notes.push(format!("stop-loss placement failed: {e}"));
            }
        }

        match self
            .exchange
            .take_profit_market_order(
                symbol,
                side.exit_order_side(),
                params.take_profit,
                params.quantity,
            )
            .await
        {
            Ok(ack) => report.take_profit_order_id = Some(ack.order_id),
            Err(e) => {
                warn!(symbol, error = %e, "take-profit placement failed after entry");
                report
                    .notes
                    .push(format!("take-profit placement failed: {e}"));
            }
        }

        ActionOutcome::Completed(report)
    }

    /// Look up balance, precision, and price, then run the sizing math.
    async fn compute_entry_params(
        &self,
        symbol: &str,
        side: PositionSide,
        levels: Option<(f64, f64)>,
    ) -> Result<TradeParams, RelayError> {
        let balance = self.exchange.balance().await?;
        let filters = self.exchange.symbol_filters(symbol).await?;
        let market_price = self.exchange.market_price(symbol).await?;

        match levels {
            Some((stop_loss, take_profit)) => explicit_level_params(
                side,
                balance,
                market_price,
                filters,
                stop_loss,
                take_profit,
                &self.config,
            ),
            None => percentage_risk_params(side, balance, market_price, filters, &self.config),
        }
    }

    // -------------------------------------------------------------------------
    // update_protective_orders
    // -------------------------------------------------------------------------

    /// Replace SL/TP on an existing position, sized to its current quantity.
    /// Never re-opens or resizes the position itself.
    pub async fn update_protective_orders(
        &self,
        symbol: &str,
        side: PositionSide,
        position: &Position,
        stop_loss: f64,
        take_profit: f64,
    ) -> ActionOutcome {
        if let ActionOutcome::Failed(e) = self.clear_orders(symbol).await {
            return ActionOutcome::Failed(format!("failed to clear orders: {e}"));
        }

        let quantity = position.abs_quantity();
        let mut report = OrderReport {
            quantity: Some(quantity),
            stop_loss_price: Some(stop_loss),
            take_profit_price: Some(take_profit),
            ..OrderReport::default()
        };

        match self
            .exchange
            .stop_market_order(symbol, side.exit_order_side(), stop_loss, quantity)
            .await
        {
            Ok(ack) => report.stop_loss_order_id = Some(ack.order_id),
            Err(e) => report.notes.push(format!("stop-loss update failed: {e}")),
        }

        match self
            .exchange
            .take_profit_market_order(symbol, side.exit_order_side(), take_profit, quantity)
            .await
        {
            Ok(ack) => report.take_profit_order_id = Some(ack.order_id),
            Err(e) => report.notes.push(format!("take-profit update failed: {e}")),
        }

        info!(
            symbol,
            side = %side,
            quantity,
            stop_loss,
            take_profit,
            issues = report.notes.len(),
            "protective orders replaced"
        );
        ActionOutcome::Completed(report)
    }

    // -------------------------------------------------------------------------
    // close_all_symbol_orders
    // -------------------------------------------------------------------------

    /// Cancel orders, then flatten whatever exposure exists on either side.
    /// Realized PnL nets out the round-trip fee on entry and exit notional.
    pub async fn close_all_symbol_orders(&self, symbol: &str) -> ActionOutcome {
        // Best effort; a failed cancel must not block flattening exposure.
        let _ = self.clear_orders(symbol).await;

        let mut total_pnl = 0.0;
        let mut closed_any = false;

        for side in [PositionSide::Long, PositionSide::Short] {
            match self.close_side(symbol, side).await {
                Ok(Some(pnl)) => {
                    total_pnl += pnl;
                    closed_any = true;
                }
                Ok(None) => {}
                Err(e) => {
                    return ActionOutcome::Failed(format!("failed to close {side}: {e}"));
                }
            }
        }

        if !closed_any {
            return ActionOutcome::Skipped("no open position to close".to_string());
        }

        info!(symbol, realized_pnl = total_pnl, "all exposure closed");
        ActionOutcome::Completed(OrderReport {
            realized_pnl: Some(total_pnl),
            ..OrderReport::default()
        })
    }

    /// Close one side's exposure if present. Returns the realized PnL of the
    /// close, or `None` when there was nothing to close.
    async fn close_side(
        &self,
        symbol: &str,
        side: PositionSide,
    ) -> Result<Option<f64>, RelayError> {
        let positions = self.exchange.positions(symbol).await?;
        let position = positions.iter().find(|p| p.side() == Some(side));

        let position = match position {
            Some(p) => p,
            None => {
                debug!(symbol, side = %side, "no exposure on this side");
                return Ok(None);
            }
        };

        let quantity = position.abs_quantity();
        let ack = self
            .exchange
            .market_order(symbol, side.exit_order_side(), quantity)
            .await?;

        let exit_price = if ack.avg_price > 0.0 {
            ack.avg_price
        } else {
            position.mark_price
        };

        let direction = match side {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        };
        let gross = direction * quantity * (exit_price - position.entry_price);
        let fees = self.config.fee_rate * quantity * (position.entry_price + exit_price);
        let pnl = gross - fees;

        info!(
            symbol,
            side = %side,
            quantity,
            entry_price = position.entry_price,
            exit_price,
            gross,
            fees,
            pnl,
            "position closed"
        );

        Ok(Some(pnl))
    }

    // -------------------------------------------------------------------------
    // take_profit_partially
    // -------------------------------------------------------------------------

    /// Close half the position and re-bracket the remainder: SL moves to the
    /// midpoint of entry and market, TP extends beyond market.
    ///
    /// With `check_history` (tp_reach signals), a reduce-direction fill newer
    /// than the position's own update and smaller than the full size means
    /// the partial close already happened — the call becomes a no-op so
    /// duplicate/redelivered alerts cannot double-close.
    pub async fn take_profit_partially(&self, symbol: &str, check_history: bool) -> ActionOutcome {
        let positions = match self.exchange.positions(symbol).await {
            Ok(p) => p,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };

        let (position, side) = match positions
            .iter()
            .find_map(|p| p.side().map(|s| (p.clone(), s)))
        {
            Some(found) => found,
            None => return ActionOutcome::Skipped("no open position".to_string()),
        };
        let full_qty = position.abs_quantity();

        if check_history {
            match self.exchange.filled_orders(symbol).await {
                Ok(history) => {
                    let already_done = history.iter().any(|o| {
                        o.status == "FILLED"
                            && o.side == side.exit_order_side()
                            && o.update_time > position.update_time
                            && o.executed_qty > 0.0
                            && o.executed_qty < full_qty
                    });
                    if already_done {
                        info!(symbol, "partial take-profit already executed — skipping");
                        return ActionOutcome::Skipped(
                            "partial take-profit already executed".to_string(),
                        );
                    }
                }
                Err(e) => {
                    // Without history the idempotency check cannot run;
                    // surface that instead of guessing.
                    return ActionOutcome::Failed(format!("order history unavailable: {e}"));
                }
            }
        }

        let filters = match self.exchange.symbol_filters(symbol).await {
            Ok(f) => f,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };
        let market_price = match self.exchange.market_price(symbol).await {
            Ok(p) => p,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };

        let partial_qty = round_to(
            full_qty * PARTIAL_CLOSE_FRACTION,
            filters.quantity_precision,
        );
        if partial_qty <= 0.0 {
            return ActionOutcome::Failed(
                "partial quantity rounded to zero for symbol precision".to_string(),
            );
        }

        let partial = match self
            .exchange
            .market_order(symbol, side.exit_order_side(), partial_qty)
            .await
        {
            Ok(ack) => ack,
            Err(e) => return ActionOutcome::Failed(format!("partial close rejected: {e}")),
        };

        // The partial close already filled; a failed cancel is logged inside
        // clear_orders and must not abort the re-bracketing.
        let _ = self.clear_orders(symbol).await;

        let entry = position.entry_price;
        let new_stop_loss = round_to((entry + market_price) / 2.0, filters.price_precision);
        let extension = (entry - market_price).abs() * TP_EXTENSION_MULTIPLIER;
        let new_take_profit = match side {
            PositionSide::Long => market_price + extension,
            PositionSide::Short => market_price - extension,
        };
        let new_take_profit = round_to(new_take_profit, filters.price_precision);

        let remaining_qty = round_to(full_qty - partial_qty, filters.quantity_precision);

        let mut report = OrderReport {
            entry_order_id: Some(partial.order_id),
            quantity: Some(partial_qty),
            stop_loss_price: Some(new_stop_loss),
            take_profit_price: Some(new_take_profit),
            market_price: Some(market_price),
            ..OrderReport::default()
        };

        match self
            .exchange
            .stop_market_order(symbol, side.exit_order_side(), new_stop_loss, remaining_qty)
            .await
        {
            Ok(ack) => report.stop_loss_order_id = Some(ack.order_id),
            Err(e) => report.notes.push(format!("stop-loss replace failed: {e}")),
        }

        match self
            .exchange
            .take_profit_market_order(
                symbol,
                side.exit_order_side(),
                new_take_profit,
                remaining_qty,
            )
            .await
        {
            Ok(ack) => report.take_profit_order_id = Some(ack.order_id),
            Err(e) => report.notes.push(format!("take-profit replace failed: {e}")),
        }

        info!(
            symbol,
            side = %side,
            partial_qty,
            remaining_qty,
            new_stop_loss,
            new_take_profit,
            issues = report.notes.len(),
            "partial take-profit executed"
        );
        ActionOutcome::Completed(report)
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("exchange", &"<dyn Exchange>")
            .field("config", &self.config)
            .finish()
    }
}
