//! Pluggable strategy decision logic.
//!
//! The engine owns the signal lifecycle; a [`Strategy`] only decides when an
//! idle symbol should enter and with what protective levels. Everything else
//! (validation, throttling, risk gating, persistence) happens in the engine.

pub mod builders;

pub use builders::build_strategy;

use async_trait::async_trait;

use common::{TickContext, TradeAction};

/// How to enter: immediately at market, or once price reaches a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryMode {
    Market,
    Limit { target_price: f64 },
}

/// An entry request produced by a strategy. Protective levels are expressed
/// as percent distances from the eventual entry price, which the engine only
/// learns from the price oracle at open time.
#[derive(Debug, Clone)]
pub struct EntryIntent {
    pub action: TradeAction,
    pub mode: EntryMode,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

/// All strategy implementations must satisfy this trait.
#[async_trait]
pub trait Strategy: std::fmt::Debug + Send + Sync {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    /// The symbol this strategy watches, e.g. "BTCUSDT".
    fn symbol(&self) -> &str;

    /// Called once per tick while the signal is idle, with the oracle price
    /// for the tick. Returns `None` when nothing should be entered.
    async fn evaluate(&self, ctx: &TickContext, price: f64) -> Option<EntryIntent>;
}
