// =============================================================================
// Application State — shared across HTTP handlers
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::processor::SignalProcessor;

/// Shared state handed to every request handler.
///
/// The exchange itself does not serialize concurrent mutations per symbol, so
/// the relay does: every webhook acquires its symbol's mutex before the
/// decision flow runs. Events for different symbols still proceed in
/// parallel.
pub struct AppState {
    pub processor: SignalProcessor,
    webhook_token: String,
    symbol_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(processor: SignalProcessor, webhook_token: String) -> Self {
        Self {
            processor,
            webhook_token,
            symbol_locks: RwLock::new(HashMap::new()),
        }
    }

    /// The token webhook callers must present. Loaded once at startup;
    /// empty means authentication is unconfigured and every request is
    /// rejected.
    pub fn webhook_token(&self) -> &str {
        &self.webhook_token
    }

    /// The serialization mutex for `symbol`, created on first use.
    pub fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.symbol_locks.read().get(symbol) {
            return lock.clone();
        }
        self.symbol_locks
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notify::NullNotifier;
    use crate::testutil::MockExchange;

    fn state() -> AppState {
        let mock = Arc::new(MockExchange::flat());
        let processor = SignalProcessor::new(mock, Arc::new(NullNotifier), Config::default());
        AppState::new(processor, "test-token".to_string())
    }

    #[test]
    fn token_is_exposed_to_the_auth_layer() {
        assert_eq!(state().webhook_token(), "test-token");
    }

    #[test]
    fn same_symbol_yields_same_lock() {
        let state = state();
        let a = state.symbol_lock("BTCUSDT");
        let b = state.symbol_lock("BTCUSDT");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_symbols_yield_independent_locks() {
        let state = state();
        let a = state.symbol_lock("BTCUSDT");
        let b = state.symbol_lock("ETHUSDT");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
