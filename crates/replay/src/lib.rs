//! Deterministic exchange stand-in.
//!
//! Serves candles from an in-memory series instead of a network connection.
//! Backtests and tests load (or push) candles up front; `get_candles` only
//! ever returns candles opened at or before `as_of`, so identical calls see
//! identical data. No real exchange is ever contacted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use common::{Candle, Error, ExchangeClient, Interval, OrderBook, Result};

pub struct ReplayClient {
    candles: RwLock<HashMap<String, Vec<Candle>>>,
    price_decimals: u32,
    quantity_decimals: u32,
}

impl Default for ReplayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayClient {
    pub fn new() -> Self {
        Self::with_decimals(2, 6)
    }

    pub fn with_decimals(price_decimals: u32, quantity_decimals: u32) -> Self {
        Self {
            candles: RwLock::new(HashMap::new()),
            price_decimals,
            quantity_decimals,
        }
    }

    /// Replace the candle series for a symbol. Kept sorted by open time.
    pub async fn load_candles(&self, symbol: &str, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.open_time);
        debug!(symbol, count = candles.len(), "candle series loaded");
        self.candles.write().await.insert(symbol.to_string(), candles);
    }

    /// Append one candle, keeping the series sorted.
    pub async fn push_candle(&self, symbol: &str, candle: Candle) {
        let mut map = self.candles.write().await;
        let series = map.entry(symbol.to_string()).or_default();
        series.push(candle);
        series.sort_by_key(|c| c.open_time);
    }

    /// Replace the series with a single flat candle at `price`, opened at
    /// `at`. Makes the oracle report exactly `price` from then on.
    pub async fn set_price(&self, symbol: &str, price: f64, at: DateTime<Utc>) {
        self.load_candles(symbol, vec![flat_candle(at, price)]).await;
    }
}

/// A candle with all four prices at `price` and unit volume.
pub fn flat_candle(open_time: DateTime<Utc>, price: f64) -> Candle {
    Candle {
        open_time,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 1.0,
    }
}

/// `count` one-minute flat candles ending at `end`, all at `price`.
pub fn flat_series(end: DateTime<Utc>, count: usize, price: f64) -> Vec<Candle> {
    (0..count)
        .map(|i| flat_candle(end - Duration::minutes((count - 1 - i) as i64), price))
        .collect()
}

#[async_trait]
impl ExchangeClient for ReplayClient {
    async fn get_candles(
        &self,
        symbol: &str,
        _interval: Interval,
        limit: usize,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let map = self.candles.read().await;
        let series = map.get(symbol).map(|s| s.as_slice()).unwrap_or_default();
        let eligible: Vec<Candle> = series
            .iter()
            .filter(|c| c.open_time <= as_of)
            .cloned()
            .collect();
        let skip = eligible.len().saturating_sub(limit);
        Ok(eligible.into_iter().skip(skip).collect())
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let map = self.candles.read().await;
        let last = map
            .get(symbol)
            .and_then(|s| s.last())
            .ok_or_else(|| Error::Exchange(format!("no candles loaded for {symbol}")))?;

        // Synthesize a book around the last close with a widening spread.
        let mut book = OrderBook::default();
        for i in 1..=depth {
            let offset = last.close * 0.0005 * i as f64;
            book.bids.push((last.close - offset, last.volume));
            book.asks.push((last.close + offset, last.volume));
        }
        Ok(book)
    }

    fn format_price(&self, _symbol: &str, raw: f64) -> String {
        format!("{raw:.*}", self.price_decimals as usize)
    }

    fn format_quantity(&self, _symbol: &str, raw: f64) -> String {
        format!("{raw:.*}", self.quantity_decimals as usize)
    }
}
