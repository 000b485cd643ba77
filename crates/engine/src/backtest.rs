use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use bus::{Channel, Event, EventBus};
use common::{Completion, Result, Signal, SignalPhase, TickContext};

use crate::tracker::SignalHandle;

/// Replays a finite, ordered timestamp sequence through one tracker.
///
/// Every tick yields a snapshot on the signal channels, including `idle`
/// ticks where nothing happened, so subscribers can observe the full
/// timeline. Terminates when the sequence is exhausted.
pub struct BacktestLoop {
    handle: SignalHandle,
    bus: Arc<EventBus>,
    symbol: String,
    strategy_name: String,
    exchange_name: String,
    timestamps: Vec<DateTime<Utc>>,
}

impl BacktestLoop {
    pub fn new(
        handle: SignalHandle,
        bus: Arc<EventBus>,
        symbol: impl Into<String>,
        strategy_name: impl Into<String>,
        exchange_name: impl Into<String>,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Self {
        Self {
            handle,
            bus,
            symbol: symbol.into(),
            strategy_name: strategy_name.into(),
            exchange_name: exchange_name.into(),
            timestamps,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            symbol = %self.symbol,
            strategy = %self.strategy_name,
            ticks = self.timestamps.len(),
            "backtest started"
        );

        // Once a signal closes, timestamps before the close are skipped:
        // no intervening tick can affect an already-closed signal. Pure
        // fast-forward; ticks at or after the boundary evaluate normally.
        let mut skip_until: Option<DateTime<Utc>> = None;

        for ts in &self.timestamps {
            if let Some(until) = skip_until {
                if *ts < until {
                    let mut snapshot = self.handle.snapshot().await;
                    snapshot.phase = SignalPhase::Idle;
                    self.emit(snapshot);
                    continue;
                }
                skip_until = None;
            }

            let ctx = TickContext {
                symbol: self.symbol.clone(),
                timestamp: *ts,
                backtest: true,
            };
            match self.handle.tick(&ctx).await {
                Ok(signal) => {
                    if let SignalPhase::Closed { closed_at, .. } = &signal.phase {
                        skip_until = Some(*closed_at);
                    }
                    self.emit(signal);
                }
                Err(err) if err.is_fatal() => {
                    self.bus.publish(
                        Channel::FatalError,
                        Event::Fatal {
                            symbol: self.symbol.clone(),
                            message: err.to_string(),
                        },
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(symbol = %self.symbol, %err, "tick failed, continuing");
                    self.bus.publish(
                        Channel::Error,
                        Event::Error {
                            symbol: self.symbol.clone(),
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        let completion = Completion {
            backtest: true,
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            exchange_name: self.exchange_name.clone(),
        };
        info!(symbol = %self.symbol, strategy = %self.strategy_name, "backtest finished");
        self.bus.publish(Channel::Done, Event::Done(completion.clone()));
        self.bus.publish(Channel::DoneBacktest, Event::Done(completion));
        Ok(())
    }

    fn emit(&self, signal: Signal) {
        self.bus
            .publish(Channel::Signal, Event::Signal(signal.clone()));
        self.bus
            .publish(Channel::SignalBacktest, Event::Signal(signal));
    }
}
