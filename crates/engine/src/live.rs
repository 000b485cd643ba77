use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use bus::{Channel, Event, EventBus};
use common::{
    Completion, PersistedSignal, Result, Signal, SignalStore, TickContext, PERSIST_SCHEMA_VERSION,
};

use crate::tracker::SignalHandle;

/// Requests cooperative shutdown of one live loop. Cheap to clone and safe
/// to fire from any task, e.g. a ctrl-c handler.
#[derive(Clone)]
pub struct LiveHandle {
    stop: Arc<AtomicBool>,
}

impl LiveHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Unbounded wall-clock tick loop for one symbol.
///
/// Restores any persisted signal before the first tick, persists every
/// evaluated snapshot before emitting it, and drains gracefully on stop:
/// an open position keeps ticking until it closes, never abandoned
/// mid-flight.
pub struct LiveLoop {
    handle: SignalHandle,
    store: Arc<dyn SignalStore>,
    bus: Arc<EventBus>,
    symbol: String,
    strategy_name: String,
    exchange_name: String,
    tick_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl LiveLoop {
    pub fn new(
        handle: SignalHandle,
        store: Arc<dyn SignalStore>,
        bus: Arc<EventBus>,
        symbol: impl Into<String>,
        strategy_name: impl Into<String>,
        exchange_name: impl Into<String>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            handle,
            store,
            bus,
            symbol: symbol.into(),
            strategy_name: strategy_name.into(),
            exchange_name: exchange_name.into(),
            tick_interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> LiveHandle {
        LiveHandle {
            stop: self.stop.clone(),
        }
    }

    /// Crash recovery: adopt the persisted signal, if any, so a restart
    /// resumes exactly where the previous process stopped.
    async fn wait_for_init(&self) -> Result<()> {
        match self.store.read_signal_data(&self.symbol).await? {
            Some(record) if record.version == PERSIST_SCHEMA_VERSION => {
                self.handle.restore(record.signal).await;
            }
            Some(record) => {
                warn!(
                    symbol = %self.symbol,
                    found = record.version,
                    expected = PERSIST_SCHEMA_VERSION,
                    "persisted record has a foreign schema version, starting fresh"
                );
            }
            None => {}
        }
        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        info!(symbol = %self.symbol, strategy = %self.strategy_name, "live loop started");
        self.wait_for_init().await?;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                let snapshot = self.handle.snapshot().await;
                if !snapshot.phase.is_open() {
                    break;
                }
                // Graceful drain: keep ticking until the position resolves.
                info!(symbol = %self.symbol, "stop requested, draining open signal");
            }

            let ctx = TickContext {
                symbol: self.symbol.clone(),
                timestamp: Utc::now(),
                backtest: false,
            };
            match self.handle.tick(&ctx).await {
                Ok(signal) => {
                    self.persist(&signal).await;
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
                    // Recoverable (exchange hiccup and the like): next
                    // iteration retries.
                    warn!(symbol = %self.symbol, %err, "tick failed, retrying next iteration");
                    self.bus.publish(
                        Channel::Error,
                        Event::Error {
                            symbol: self.symbol.clone(),
                            message: err.to_string(),
                        },
                    );
                }
            }

            tokio::time::sleep(self.tick_interval).await;
        }

        // The loop only exits at idle/closed, so the record is stale.
        if let Err(err) = self.store.clear_signal_data(&self.symbol).await {
            warn!(symbol = %self.symbol, %err, "failed to clear persisted record on exit");
        }

        let completion = Completion {
            backtest: false,
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            exchange_name: self.exchange_name.clone(),
        };
        info!(symbol = %self.symbol, "live loop stopped");
        self.bus.publish(Channel::Done, Event::Done(completion.clone()));
        self.bus.publish(Channel::DoneLive, Event::Done(completion));
        Ok(())
    }

    /// Durable checkpoint before emission. A write failure is recoverable:
    /// in-memory state stays authoritative and the next tick retries.
    async fn persist(&self, signal: &Signal) {
        let record = PersistedSignal::new(signal.clone());
        if let Err(err) = self.store.write_signal_data(&self.symbol, &record).await {
            warn!(symbol = %self.symbol, %err, "persistence write failed");
            self.bus.publish(
                Channel::Error,
                Event::Error {
                    symbol: self.symbol.clone(),
                    message: format!("persistence write failed: {err}"),
                },
            );
        }
    }

    fn emit(&self, signal: Signal) {
        self.bus
            .publish(Channel::Signal, Event::Signal(signal.clone()));
        self.bus
            .publish(Channel::SignalLive, Event::Signal(signal));
    }
}
