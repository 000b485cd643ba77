use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{Error, Interval, Result, TradeAction};

/// Symbol formatting rules for one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSchema {
    pub name: String,
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
    #[serde(default = "default_quantity_decimals")]
    pub quantity_decimals: u32,
}

fn default_price_decimals() -> u32 {
    2
}

fn default_quantity_decimals() -> u32 {
    6
}

/// One strategy instance: type selects the implementation, params feed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySchema {
    pub name: String,
    /// Strategy type identifier, e.g. "breakout" or "limit_entry".
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub symbol: String,
    pub exchange: String,
    pub frame: String,
    /// Throttle interval for new entry transitions.
    pub interval: Interval,
    pub risk: String,
    pub sizing: String,
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

/// Generator of the ordered timestamp sequence a backtest replays, plus how
/// long an open signal may stay open before expiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSchema {
    pub name: String,
    /// RFC3339 start of the replay window.
    pub start: String,
    pub step_secs: u64,
    pub count: usize,
    /// Open signals are closed `time_expired` once older than this.
    pub expires_after_secs: u64,
}

impl FrameSchema {
    pub fn start_time(&self) -> Result<DateTime<Utc>> {
        self.start
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::Config(format!("frame '{}': bad start '{}': {e}", self.name, self.start)))
    }

    /// The finite, strictly ordered timestamp sequence for a backtest.
    pub fn timestamps(&self) -> Result<Vec<DateTime<Utc>>> {
        let start = self.start_time()?;
        let step = Duration::seconds(self.step_secs as i64);
        Ok((0..self.count).map(|i| start + step * i as i32).collect())
    }

    pub fn expires_after(&self) -> Duration {
        Duration::seconds(self.expires_after_secs as i64)
    }
}

/// Risk limits applied before any open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSchema {
    pub name: String,
    /// Maximum entry notional (entry price x quantity).
    pub max_notional: f64,
}

/// Position sizing in base-asset units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingSchema {
    pub name: String,
    pub quantity: f64,
}

/// Default trade direction for strategies that take it from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSchema {
    pub name: String,
    pub action: TradeAction,
}

/// Which strategies a walker run compares over which frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerSchema {
    pub name: String,
    pub strategies: Vec<String>,
    pub frame: String,
}
