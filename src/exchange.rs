// =============================================================================
// Exchange interface — the seam between the decision core and the venue
// =============================================================================
//
// The orchestrator only ever talks to `dyn Exchange`. The live implementation
// is the Binance USDⓈ-M futures client; tests substitute a scripted mock.
// Every method is fallible and returns structured errors — no raw panics
// cross this boundary.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::types::PositionSide;

// ---------------------------------------------------------------------------
// Value objects
// ---------------------------------------------------------------------------

/// One OHLCV candle as reported by the exchange, oldest-first in any series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

/// Exchange-reported exposure for one symbol. Always a fresh snapshot; never
/// cached across invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed: positive = LONG, negative = SHORT.
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub liquidation_price: f64,
    pub isolated_margin: f64,
    pub notional: f64,
    /// Milliseconds since epoch of the last position update.
    pub update_time: i64,
}

impl Position {
    /// Side derived from the signed quantity. `None` for a flat record.
    pub fn side(&self) -> Option<PositionSide> {
        if self.quantity > 0.0 {
            Some(PositionSide::Long)
        } else if self.quantity < 0.0 {
            Some(PositionSide::Short)
        } else {
            None
        }
    }

    pub fn abs_quantity(&self) -> f64 {
        self.quantity.abs()
    }
}

/// Price and quantity decimal precision for one symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub price_precision: u32,
    pub quantity_precision: u32,
}

/// Acknowledgement for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: u64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    /// Average fill price; zero until the exchange reports fills.
    pub avg_price: f64,
    pub executed_qty: f64,
}

/// One historical order from the symbol's order history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilledOrder {
    pub order_id: u64,
    pub side: String,
    pub order_type: String,
    pub status: String,
    pub executed_qty: f64,
    pub avg_price: f64,
    /// Milliseconds since epoch of the last order update (fill time).
    pub update_time: i64,
    pub reduce_only: bool,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Order, position, and market-data surface of the venue.
///
/// The contract mirrors Binance USDⓈ-M futures but carries no Binance types;
/// everything crossing the seam is one of the value objects above.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// All position records for `symbol` (flat records included).
    async fn positions(&self, symbol: &str) -> Result<Vec<Position>, RelayError>;

    /// Available quote-asset (USDT) balance.
    async fn balance(&self) -> Result<f64, RelayError>;

    /// Price/quantity precision for `symbol`.
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, RelayError>;

    /// Latest traded price for `symbol`.
    async fn market_price(&self, symbol: &str) -> Result<f64, RelayError>;

    /// Up to `limit` closed candles, oldest first.
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, RelayError>;

    /// Submit a market order.
    async fn market_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: f64,
    ) -> Result<OrderAck, RelayError>;

    /// Submit a stop-market order that closes the whole position when
    /// `stop_price` trades.
    async fn stop_market_order(
        &self,
        symbol: &str,
        side: &str,
        stop_price: f64,
        quantity: f64,
    ) -> Result<OrderAck, RelayError>;

    /// Submit a take-profit-market order that closes the whole position when
    /// `stop_price` trades.
    async fn take_profit_market_order(
        &self,
        symbol: &str,
        side: &str,
        stop_price: f64,
        quantity: f64,
    ) -> Result<OrderAck, RelayError>;

    /// Cancel every open order for `symbol`.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), RelayError>;

    /// Set the leverage used for subsequent orders on `symbol`.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), RelayError>;

    /// Recent order history for `symbol` (newest entries last).
    async fn filled_orders(&self, symbol: &str) -> Result<Vec<FilledOrder>, RelayError>;
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn position(quantity: f64) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            quantity,
            entry_price: 50_000.0,
            mark_price: 50_200.0,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
            isolated_margin: 0.0,
            notional: 0.0,
            update_time: 0,
        }
    }

    #[test]
    fn side_from_signed_quantity() {
        assert_eq!(position(0.5).side(), Some(PositionSide::Long));
        assert_eq!(position(-0.5).side(), Some(PositionSide::Short));
        assert_eq!(position(0.0).side(), None);
    }

    #[test]
    fn abs_quantity_strips_sign() {
        assert!((position(-1.25).abs_quantity() - 1.25).abs() < 1e-12);
    }
}
