// =============================================================================
// Position & risk calculator — sizing, stop-loss, take-profit math
// =============================================================================
//
// Two sizing modes:
//
//   * Percentage-risk: commit investment% of balance at the configured
//     leverage, then derive SL/TP so the worst case loses max_loss% of
//     balance and the best case pays out at the risk:reward ratio.
//
//   * Explicit levels: the alert supplied its own SL/TP prices; size the
//     position so that hitting the stop loses investment% of balance.
//
// Both modes round prices to the symbol's price precision and quantities to
// its quantity precision, and fail with a structured Calculation error rather
// than emitting a partial/garbage order.
// =============================================================================

use tracing::debug;

use crate::config::Config;
use crate::error::RelayError;
use crate::exchange::SymbolFilters;
use crate::types::PositionSide;

/// Fully computed order parameters for one new position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeParams {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
    /// Margin committed (position value / leverage), in quote units.
    pub investment_amount: f64,
    pub market_price: f64,
}

/// Round `value` to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Percentage-risk sizing (see module header).
pub fn percentage_risk_params(
    side: PositionSide,
    balance: f64,
    market_price: f64,
    filters: SymbolFilters,
    config: &Config,
) -> Result<TradeParams, RelayError> {
    if balance <= 0.0 {
        return Err(RelayError::Calculation("account balance is zero".to_string()));
    }
    if market_price <= 0.0 {
        return Err(RelayError::Calculation("market price is zero".to_string()));
    }

    let (risk, reward) = config.risk_reward_parts().ok_or_else(|| {
        RelayError::Calculation(format!("invalid risk:reward ratio '{}'", config.risk_reward))
    })?;
    let rr_multiplier = reward / risk;

    let cap = balance * config.max_investment_fraction;
    let investment_amount = (balance * config.investment_pct / 100.0).min(cap);
    let position_value = investment_amount * config.leverage as f64;

    let quantity = round_to(position_value / market_price, filters.quantity_precision);
    if quantity <= 0.0 {
        return Err(RelayError::Calculation(
            "quantity rounded to zero for symbol precision".to_string(),
        ));
    }

    let max_loss_usd = balance * config.max_loss_pct / 100.0;
    let price_diff = max_loss_usd / quantity;

    let (stop_loss, take_profit) = match side {
        PositionSide::Long => (
            market_price - price_diff,
            market_price + price_diff * rr_multiplier,
        ),
        PositionSide::Short => (
            market_price + price_diff,
            market_price - price_diff * rr_multiplier,
        ),
    };

    let stop_loss = round_to(stop_loss, filters.price_precision);
    let take_profit = round_to(take_profit, filters.price_precision);

    debug!(
        side = %side,
        market_price,
        quantity,
        investment_amount,
        stop_loss,
        take_profit,
        "percentage-risk sizing complete"
    );

    Ok(TradeParams {
        stop_loss,
        take_profit,
        quantity,
        investment_amount,
        market_price,
    })
}

/// Explicit-level sizing: SL/TP come from the alert; quantity is derived so
/// that the stop costs investment% of balance (capped).
pub fn explicit_level_params(
    side: PositionSide,
    balance: f64,
    market_price: f64,
    filters: SymbolFilters,
    stop_loss: f64,
    take_profit: f64,
    config: &Config,
) -> Result<TradeParams, RelayError> {
    if balance <= 0.0 {
        return Err(RelayError::Calculation("account balance is zero".to_string()));
    }
    if market_price <= 0.0 {
        return Err(RelayError::Calculation("market price is zero".to_string()));
    }

    let stop_loss = round_to(stop_loss, filters.price_precision);
    let take_profit = round_to(take_profit, filters.price_precision);

    let max_loss_per_unit = (market_price - stop_loss).abs();
    if max_loss_per_unit <= 0.0 {
        return Err(RelayError::Calculation(
            "stop-loss coincides with market price".to_string(),
        ));
    }

    let cap = balance * config.max_investment_fraction;
    let max_loss_usd = (balance * config.investment_pct / 100.0).min(cap);

    let mut quantity = round_to(max_loss_usd / max_loss_per_unit, filters.quantity_precision);
    if quantity <= 0.0 {
        return Err(RelayError::Calculation(
            "quantity rounded to zero for symbol precision".to_string(),
        ));
    }

    let mut investment_amount = quantity * market_price / config.leverage as f64;

    // Stop distance can be so tight that the derived position outgrows the
    // cap; recompute the quantity against the capped margin.
    if investment_amount > cap {
        quantity = round_to(
            cap * config.leverage as f64 / market_price,
            filters.quantity_precision,
        );
        if quantity <= 0.0 {
            return Err(RelayError::Calculation(
                "capped quantity rounded to zero".to_string(),
            ));
        }
        investment_amount = quantity * market_price / config.leverage as f64;
    }

    debug!(
        side = %side,
        market_price,
        quantity,
        investment_amount,
        stop_loss,
        take_profit,
        "explicit-level sizing complete"
    );

    Ok(TradeParams {
        stop_loss,
        take_profit,
        quantity,
        investment_amount,
        market_price,
    })
}
