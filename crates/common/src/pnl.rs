//! Realized PNL arithmetic shared by the tracker and the performance events.

use crate::{Costs, TradeAction};

/// Profit before costs: signed price move times quantity.
pub fn gross_pnl(action: TradeAction, entry_price: f64, close_price: f64, quantity: f64) -> f64 {
    match action {
        TradeAction::Long => (close_price - entry_price) * quantity,
        TradeAction::Short => (entry_price - close_price) * quantity,
    }
}

/// Fees plus slippage applied on both legs, charged against entry notional.
pub fn round_trip_costs(entry_price: f64, quantity: f64, costs: &Costs) -> f64 {
    entry_price * quantity * costs.round_trip_pct() / 100.0
}

pub fn net_pnl(
    action: TradeAction,
    entry_price: f64,
    close_price: f64,
    quantity: f64,
    costs: &Costs,
) -> f64 {
    gross_pnl(action, entry_price, close_price, quantity)
        - round_trip_costs(entry_price, quantity, costs)
}
