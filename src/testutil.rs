// =============================================================================
// Test Support — scripted in-memory exchange
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::RelayError;
use crate::exchange::{Candle, Exchange, FilledOrder, OrderAck, Position, SymbolFilters};

/// In-memory [`Exchange`] whose books are set up per test. Records every
/// call so tests can assert on ordering and on calls that must NOT happen.
pub struct MockExchange {
    positions: Mutex<Vec<Position>>,
    filled: Mutex<Vec<FilledOrder>>,
    klines: Mutex<Vec<Candle>>,
    price: Mutex<f64>,
    balance: f64,
    filters: SymbolFilters,
    fail_market: AtomicBool,
    fail_stop: AtomicBool,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MockExchange {
    /// No position, 10 000 USDT free, price 100, precision 2/2.
    pub fn flat() -> Self {
        Self {
            positions: Mutex::new(Vec::new()),
            filled: Mutex::new(Vec::new()),
            klines: Mutex::new(Vec::new()),
            price: Mutex::new(100.0),
            balance: 10_000.0,
            filters: SymbolFilters {
                price_precision: 2,
                quantity_precision: 2,
            },
            fail_market: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
        }
    }

    /// Like [`flat`](Self::flat) but with one open position: positive
    /// `quantity` for LONG, negative for SHORT.
    pub fn with_position(quantity: f64, entry_price: f64) -> Self {
        let mock = Self::flat();
        mock.positions.lock().push(Position {
            symbol: "BTCUSDT".to_string(),
            quantity,
            entry_price,
            mark_price: entry_price,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
            isolated_margin: 0.0,
            notional: quantity.abs() * entry_price,
            update_time: 1_700_000_000_000,
        });
        mock
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock() = price;
    }

    pub fn set_klines(&self, candles: Vec<Candle>) {
        *self.klines.lock() = candles;
    }

    /// Seed the symbol's kline history with `closes`, one candle per close.
    pub fn set_closes(&self, closes: &[f64]) {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: i as i64 * 60_000,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                close_time: i as i64 * 60_000 + 59_999,
            })
            .collect();
        self.set_klines(candles);
    }

    pub fn push_filled_order(&self, side: &str, executed_qty: f64, update_time: i64) {
        self.filled.lock().push(FilledOrder {
            order_id: self.next_id.fetch_add(1, Ordering::SeqCst),
            side: side.to_string(),
            order_type: "MARKET".to_string(),
            status: "FILLED".to_string(),
            executed_qty,
            avg_price: *self.price.lock(),
            update_time,
            reduce_only: true,
        });
    }

    pub fn fail_market_orders(&self) {
        self.fail_market.store(true, Ordering::SeqCst);
    }

    pub fn fail_stop_orders(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    pub fn first_position(&self) -> Position {
        self.positions.lock()[0].clone()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn ack(&self, symbol: &str, side: &str, order_type: &str, quantity: f64) -> OrderAck {
        let order_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        OrderAck {
            order_id,
            client_order_id: format!("mock-{order_id}"),
            symbol: symbol.to_string(),
            side: side.to_string(),
            order_type: order_type.to_string(),
            avg_price: *self.price.lock(),
            executed_qty: quantity,
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn positions(&self, _symbol: &str) -> Result<Vec<Position>, RelayError> {
        self.record("positions".to_string());
        Ok(self.positions.lock().clone())
    }

    async fn balance(&self) -> Result<f64, RelayError> {
        self.record("balance".to_string());
        Ok(self.balance)
    }

    async fn symbol_filters(&self, _symbol: &str) -> Result<SymbolFilters, RelayError> {
        self.record("symbol_filters".to_string());
        Ok(self.filters.clone())
    }

    async fn market_price(&self, _symbol: &str) -> Result<f64, RelayError> {
        self.record("market_price".to_string());
        Ok(*self.price.lock())
    }

    async fn klines(
        &self,
        _symbol: &str,
        interval: &str,
        _limit: u32,
    ) -> Result<Vec<Candle>, RelayError> {
        self.record(format!("klines {interval}"));
        Ok(self.klines.lock().clone())
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: f64,
    ) -> Result<OrderAck, RelayError> {
        self.record(format!("market_order {side} {quantity}"));
        if self.fail_market.load(Ordering::SeqCst) {
            return Err(RelayError::Order("scripted market-order failure".to_string()));
        }
        // Keep the books consistent: an exit-side fill flattens or reduces
        // the matching position.
        let mut positions = self.positions.lock();
        for position in positions.iter_mut() {
            let is_exit = (position.quantity > 0.0 && side == "SELL")
                || (position.quantity < 0.0 && side == "BUY");
            if is_exit && quantity <= position.quantity.abs() + 1e-9 {
                position.quantity -= position.quantity.signum() * quantity;
                break;
            }
        }
        Ok(self.ack(symbol, side, "MARKET", quantity))
    }

    async fn stop_market_order(
        &self,
        symbol: &str,
        side: &str,
        stop_price: f64,
        quantity: f64,
    ) -> Result<OrderAck, RelayError> {
        self.record(format!("stop_market_order {side} {stop_price} {quantity}"));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RelayError::Order("scripted stop-order failure".to_string()));
        }
        Ok(self.ack(symbol, side, "STOP_MARKET", quantity))
    }

    async fn take_profit_market_order(
        &self,
        symbol: &str,
        side: &str,
        stop_price: f64,
        quantity: f64,
    ) -> Result<OrderAck, RelayError> {
        self.record(format!(
            "take_profit_market_order {side} {stop_price} {quantity}"
        ));
        Ok(self.ack(symbol, side, "TAKE_PROFIT_MARKET", quantity))
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), RelayError> {
        self.record("cancel_all_orders".to_string());
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> Result<(), RelayError> {
        self.record(format!("set_leverage {leverage}"));
        Ok(())
    }

    async fn filled_orders(&self, _symbol: &str) -> Result<Vec<FilledOrder>, RelayError> {
        self.record("filled_orders".to_string());
        Ok(self.filled.lock().clone())
    }
}
