use std::sync::Arc;

use chrono::{DateTime, Utc};

use common::{Error, ExchangeClient, Interval, Result, VWAP_WINDOW};

/// Computes the single representative price everything else consumes.
///
/// Volume-weighted average of the most recent [`VWAP_WINDOW`] one-minute
/// candles ending at or before `as_of`. Deterministic: the same
/// `(symbol, as_of)` always yields the same price — there are no hidden
/// wall-clock reads, which is what makes backtests reproducible.
pub struct PriceOracle {
    client: Arc<dyn ExchangeClient>,
}

impl PriceOracle {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }

    pub async fn average_price(&self, symbol: &str, as_of: DateTime<Utc>) -> Result<f64> {
        let candles = self
            .client
            .get_candles(symbol, Interval::M1, VWAP_WINDOW, as_of)
            .await?;

        if candles.is_empty() {
            return Err(Error::InsufficientData(format!(
                "no candles for {symbol} at or before {as_of}"
            )));
        }

        let window = &candles[candles.len().saturating_sub(VWAP_WINDOW)..];
        let total_volume: f64 = window.iter().map(|c| c.volume).sum();
        if total_volume > 0.0 {
            Ok(window.iter().map(|c| c.close * c.volume).sum::<f64>() / total_volume)
        } else {
            // All-zero volume: fall back to the plain mean of closes.
            Ok(window.iter().map(|c| c.close).sum::<f64>() / window.len() as f64)
        }
    }
}
