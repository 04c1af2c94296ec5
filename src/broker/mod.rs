// Broker seam: market data and order management the core depends on

pub mod paper;

use crate::models::{
    Candle, OpenPosition, OrderReceipt, PendingOrder, Quote, StopOrderRequest, SymbolSpec,
    Timeframe,
};
use crate::Result;

pub use paper::PaperBroker;

/// Market-data and order-management collaborator.
///
/// Calls are synchronous and blocking. Implementations that keep state use
/// interior mutability so one handle can be shared by the controllers of
/// several symbols and the polling loop.
pub trait Broker: Send + Sync {
    /// Closed candles, oldest first, at most `limit`
    fn fetch_history(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>>;

    /// Most recent closed candle, if any
    fn latest_closed_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>>;

    fn quote(&self, symbol: &str) -> Result<Quote>;

    fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec>;

    fn place_stop_order(&self, request: &StopOrderRequest) -> Result<OrderReceipt>;

    /// Move the stop of an open position; `Ok(false)` when the broker refuses
    fn modify_stop_loss(&self, ticket: u64, new_stop: f64) -> Result<bool>;

    fn cancel_order(&self, ticket: u64) -> Result<bool>;

    fn open_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>>;

    fn open_positions(&self, symbol: &str) -> Result<Vec<OpenPosition>>;

    fn tick_size(&self, symbol: &str) -> Result<f64> {
        Ok(self.symbol_spec(symbol)?.tick_size)
    }

    fn contract_spread(&self, symbol: &str) -> Result<f64> {
        Ok(self.symbol_spec(symbol)?.spread)
    }

    /// Broker minimum stop distance in price units (0 when not reported)
    fn min_stop_distance(&self, symbol: &str) -> Result<f64> {
        Ok(self.symbol_spec(symbol)?.stop_level_distance())
    }
}
