use serde::{Deserialize, Serialize};

use crate::schemas::*;

/// Top-level schema file (TOML).
///
/// Example `config/schemas.toml`:
/// ```toml
/// [[exchange]]
/// name = "replay"
/// price_decimals = 2
///
/// [[frame]]
/// name = "jan-1h"
/// start = "2024-01-01T00:00:00Z"
/// step_secs = 60
/// count = 60
/// expires_after_secs = 3600
///
/// [[risk]]
/// name = "default"
/// max_notional = 1000.0
///
/// [[sizing]]
/// name = "small"
/// quantity = 0.01
///
/// [[strategy]]
/// type = "breakout"
/// name = "btc-breakout"
/// symbol = "BTCUSDT"
/// exchange = "replay"
/// frame = "jan-1h"
/// interval = "m5"
/// risk = "default"
/// sizing = "small"
///
/// [strategy.params]
/// above = 45000.0
/// take_profit_pct = 3.0
/// stop_loss_pct = 1.5
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(rename = "exchange", default)]
    pub exchanges: Vec<ExchangeSchema>,
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategySchema>,
    #[serde(rename = "frame", default)]
    pub frames: Vec<FrameSchema>,
    #[serde(rename = "risk", default)]
    pub risks: Vec<RiskSchema>,
    #[serde(rename = "sizing", default)]
    pub sizings: Vec<SizingSchema>,
    #[serde(rename = "action", default)]
    pub actions: Vec<ActionSchema>,
    #[serde(rename = "walker", default)]
    pub walkers: Vec<WalkerSchema>,
}

impl SchemaFile {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read schema file at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse schema file at '{path}': {e}"))
    }
}
