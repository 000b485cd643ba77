use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use common::{Error, Result, TickContext, TradeAction};
use registry::StrategySchema;

use crate::{EntryIntent, EntryMode, Strategy};

/// Build a strategy instance from its schema, keyed on `type`.
pub fn build_strategy(schema: &StrategySchema) -> Result<Arc<dyn Strategy>> {
    let strategy: Arc<dyn Strategy> = match schema.strategy_type.as_str() {
        "breakout" => Arc::new(BreakoutStrategy::new(schema)),
        "limit_entry" => Arc::new(LimitEntryStrategy::new(schema)),
        other => {
            return Err(Error::Config(format!(
                "unknown strategy type '{other}' for '{}'",
                schema.name
            )))
        }
    };
    info!(name = %strategy.name(), symbol = %strategy.symbol(), "Built strategy");
    Ok(strategy)
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_float()).unwrap_or(default)
}

fn param_action(params: &HashMap<String, toml::Value>, key: &str) -> TradeAction {
    match params.get(key).and_then(|v| v.as_str()) {
        Some("short") => TradeAction::Short,
        _ => TradeAction::Long,
    }
}

// ─── Concrete strategy types ──────────────────────────────────────────────────

/// Market entry once price crosses a level: long above `above`, or short
/// below `below` when configured that way.
#[derive(Debug)]
struct BreakoutStrategy {
    name: String,
    symbol: String,
    action: TradeAction,
    trigger: f64,
    take_profit_pct: f64,
    stop_loss_pct: f64,
}

impl BreakoutStrategy {
    fn new(schema: &StrategySchema) -> Self {
        let action = param_action(&schema.params, "action");
        let trigger = match action {
            TradeAction::Long => param_f64(&schema.params, "above", f64::MAX),
            TradeAction::Short => param_f64(&schema.params, "below", 0.0),
        };
        Self {
            name: schema.name.clone(),
            symbol: schema.symbol.clone(),
            action,
            trigger,
            take_profit_pct: param_f64(&schema.params, "take_profit_pct", 3.0),
            stop_loss_pct: param_f64(&schema.params, "stop_loss_pct", 1.5),
        }
    }
}

#[async_trait]
impl Strategy for BreakoutStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn evaluate(&self, _ctx: &TickContext, price: f64) -> Option<EntryIntent> {
        let triggered = match self.action {
            TradeAction::Long => price >= self.trigger,
            TradeAction::Short => price <= self.trigger,
        };
        triggered.then(|| EntryIntent {
            action: self.action,
            mode: EntryMode::Market,
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
        })
    }
}

/// Always requests a scheduled entry at a fixed target price; the engine
/// fills it once the oracle price reaches the target.
#[derive(Debug)]
struct LimitEntryStrategy {
    name: String,
    symbol: String,
    action: TradeAction,
    target_price: f64,
    take_profit_pct: f64,
    stop_loss_pct: f64,
}

impl LimitEntryStrategy {
    fn new(schema: &StrategySchema) -> Self {
        Self {
            name: schema.name.clone(),
            symbol: schema.symbol.clone(),
            action: param_action(&schema.params, "action"),
            target_price: param_f64(&schema.params, "target_price", 0.0),
            take_profit_pct: param_f64(&schema.params, "take_profit_pct", 3.0),
            stop_loss_pct: param_f64(&schema.params, "stop_loss_pct", 1.5),
        }
    }
}

#[async_trait]
impl Strategy for LimitEntryStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn evaluate(&self, _ctx: &TickContext, _price: f64) -> Option<EntryIntent> {
        if self.target_price <= 0.0 {
            return None;
        }
        Some(EntryIntent {
            action: self.action,
            mode: EntryMode::Limit {
                target_price: self.target_price,
            },
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
        })
    }
}
