use std::sync::Arc;

use tracing::info;

use bus::{Channel, Event, EventBus};
use common::Result;

use crate::backtest::BacktestLoop;

/// Runs several strategies through the same backtest timeline, one after
/// another in registration order, for side-by-side comparison. Emits a
/// progress event as each strategy finishes and one completion event at
/// the end.
pub struct Walker {
    bus: Arc<EventBus>,
    runs: Vec<(String, BacktestLoop)>,
}

impl Walker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            runs: Vec::new(),
        }
    }

    pub fn register(&mut self, strategy_name: impl Into<String>, backtest: BacktestLoop) {
        self.runs.push((strategy_name.into(), backtest));
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub async fn run(&self) -> Result<()> {
        let total = self.runs.len();
        info!(total, "walker started");

        for (index, (strategy_name, backtest)) in self.runs.iter().enumerate() {
            backtest.run().await?;
            info!(strategy = %strategy_name, finished = index + 1, total, "walker progress");
            self.bus.publish(
                Channel::WalkerProgress,
                Event::WalkerProgress {
                    strategy_name: strategy_name.clone(),
                    index: index + 1,
                    total,
                },
            );
        }

        info!(total, "walker finished");
        self.bus
            .publish(Channel::WalkerComplete, Event::WalkerComplete { total });
        Ok(())
    }
}
