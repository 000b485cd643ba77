use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Candle, Interval, OrderBook, Result};

/// Abstraction over the exchange market-data capability.
///
/// The core treats this as black-box, retryable I/O. `ReplayClient` in
/// `crates/replay` implements it for backtests and tests; a real connector
/// would implement it for live trading.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch up to `limit` candles for the symbol, newest last. Only candles
    /// opened at or before `as_of` may be returned, so that two calls with
    /// the same `as_of` always see the same data.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Order book snapshot truncated to `depth` levels per side.
    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    /// Render a raw price with the symbol's price precision.
    fn format_price(&self, symbol: &str, raw: f64) -> String;

    /// Render a raw quantity with the symbol's quantity precision.
    fn format_quantity(&self, symbol: &str, raw: f64) -> String;
}
