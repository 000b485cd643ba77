use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bus::{Channel, Event, EventBus};
use common::{
    pnl, CloseReason, Costs, Error, FillDirection, Interval, PartialFill, Position, Result, Signal,
    SignalPhase, TickContext, TradeAction,
};
use strategy::{EntryIntent, EntryMode, Strategy};

use crate::oracle::PriceOracle;

/// Everything a tracker needs to know about its (symbol, strategy,
/// exchange, frame) combination, resolved from the schema registries at
/// construction time.
pub struct TrackerConfig {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
    /// Minimum gap between two entry transitions for this symbol.
    pub throttle: Interval,
    pub costs: Costs,
    /// Position size in base-asset units.
    pub quantity: f64,
    /// Risk cap on entry notional (entry price x quantity).
    pub max_notional: f64,
    /// Open signals older than this are closed `time_expired`.
    pub expires_after: Duration,
}

/// Commit requests that take effect on the next tick.
#[derive(Default)]
struct PendingCommits {
    close: Option<String>,
    cancel: Option<String>,
    activate: Option<String>,
}

/// Owns the lifecycle of one pending/open trade. Pure evaluation logic:
/// the only I/O it performs is the oracle price lookup; persistence and
/// snapshot emission belong to the tick loops.
pub struct SignalTracker {
    cfg: TrackerConfig,
    strategy: Arc<dyn Strategy>,
    oracle: Arc<PriceOracle>,
    bus: Arc<EventBus>,
    phase: SignalPhase,
    last_tick_at: Option<DateTime<Utc>>,
    last_entry_at: Option<DateTime<Utc>>,
    last_transition_at: Option<DateTime<Utc>>,
    pending: PendingCommits,
}

impl SignalTracker {
    pub fn new(
        cfg: TrackerConfig,
        strategy: Arc<dyn Strategy>,
        oracle: Arc<PriceOracle>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            cfg,
            strategy,
            oracle,
            bus,
            phase: SignalPhase::Idle,
            last_tick_at: None,
            last_entry_at: None,
            last_transition_at: None,
            pending: PendingCommits::default(),
        }
    }

    pub fn snapshot(&self) -> Signal {
        Signal {
            symbol: self.cfg.symbol.clone(),
            strategy_name: self.cfg.strategy_name.clone(),
            exchange_name: self.cfg.exchange_name.clone(),
            frame_name: self.cfg.frame_name.clone(),
            phase: self.phase.clone(),
            last_transition_at: self.last_transition_at,
        }
    }

    /// Adopt a previously persisted signal. Called once before the first
    /// live tick so a restart resumes exactly where the old process left off.
    pub fn restore(&mut self, signal: Signal) {
        info!(
            symbol = %self.cfg.symbol,
            state = signal.phase.name(),
            "restoring persisted signal"
        );
        // Only an entry-bearing phase counts as a recent entry: a record
        // that settled at closed/idle must not throttle the next entry.
        self.last_entry_at = if signal.phase.is_open() {
            signal.last_transition_at
        } else {
            None
        };
        self.phase = signal.phase;
        self.last_transition_at = signal.last_transition_at;
    }

    /// Evaluate one tick. Returns the snapshot to emit for this tick.
    pub async fn tick(&mut self, ctx: &TickContext) -> Result<Signal> {
        if let Some(last) = self.last_tick_at {
            if ctx.timestamp < last {
                self.report_validation(format!(
                    "tick timestamp {} precedes last evaluated tick {last}",
                    ctx.timestamp
                ));
                return Ok(self.snapshot());
            }
        }

        // closed → idle is immediate: the closed snapshot went out on the
        // previous tick, so the symbol is free again from here on.
        if matches!(self.phase, SignalPhase::Closed { .. }) {
            self.transition(SignalPhase::Idle, ctx.timestamp);
        }

        let price = self
            .oracle
            .average_price(&self.cfg.symbol, ctx.timestamp)
            .await?;
        self.last_tick_at = Some(ctx.timestamp);

        match self.phase.clone() {
            SignalPhase::Idle => self.tick_idle(ctx, price).await,
            SignalPhase::Scheduled {
                action,
                target_price,
                take_profit,
                stop_loss,
                ..
            } => self.tick_scheduled(ctx, price, action, target_price, take_profit, stop_loss),
            SignalPhase::Opened { position } => self.tick_opened(ctx, position, price),
            SignalPhase::Active { position } => self.tick_active(ctx, position, price),
            SignalPhase::Closed { .. } => {}
        }

        Ok(self.snapshot())
    }

    async fn tick_idle(&mut self, ctx: &TickContext, price: f64) {
        let Some(intent) = self.strategy.evaluate(ctx, price).await else {
            return;
        };

        if self.throttled(ctx.timestamp) {
            debug!(symbol = %self.cfg.symbol, "entry suppressed by interval throttle");
            return;
        }

        let entry_estimate = match intent.mode {
            EntryMode::Market => price,
            EntryMode::Limit { target_price } => target_price,
        };
        let notional = entry_estimate * self.cfg.quantity;
        if notional > self.cfg.max_notional {
            warn!(
                symbol = %self.cfg.symbol,
                notional,
                cap = self.cfg.max_notional,
                "entry rejected by risk cap"
            );
            self.bus.publish(
                Channel::RiskRejection,
                Event::RiskRejection {
                    symbol: self.cfg.symbol.clone(),
                    notional,
                    reason: format!(
                        "entry notional {notional:.2} exceeds cap {:.2}",
                        self.cfg.max_notional
                    ),
                },
            );
            return;
        }

        match intent.mode {
            EntryMode::Market => match build_position(&intent, price, ctx.timestamp) {
                Ok(position) => {
                    info!(
                        symbol = %self.cfg.symbol,
                        action = %position.action,
                        entry = position.entry_price,
                        tp = position.take_profit,
                        sl = position.stop_loss,
                        "signal opened"
                    );
                    self.last_entry_at = Some(ctx.timestamp);
                    self.transition(SignalPhase::Opened { position }, ctx.timestamp);
                }
                Err(msg) => self.report_validation(msg),
            },
            EntryMode::Limit { target_price } => {
                let (take_profit, stop_loss) =
                    protective_levels(intent.action, target_price, &intent);
                if let Err(msg) = validate_levels(intent.action, target_price, take_profit, stop_loss)
                {
                    self.report_validation(msg);
                    return;
                }
                info!(
                    symbol = %self.cfg.symbol,
                    action = %intent.action,
                    target = target_price,
                    "entry scheduled"
                );
                self.last_entry_at = Some(ctx.timestamp);
                self.transition(
                    SignalPhase::Scheduled {
                        action: intent.action,
                        target_price,
                        take_profit,
                        stop_loss,
                        placed_at: ctx.timestamp,
                    },
                    ctx.timestamp,
                );
            }
        }
    }

    fn tick_scheduled(
        &mut self,
        ctx: &TickContext,
        price: f64,
        action: TradeAction,
        target_price: f64,
        take_profit: f64,
        stop_loss: f64,
    ) {
        // A force-close on a not-yet-filled signal has nothing to unwind;
        // both it and an explicit cancel return the symbol to idle.
        if let Some(id) = self.pending.cancel.take().or_else(|| self.pending.close.take()) {
            info!(symbol = %self.cfg.symbol, id = %id, "scheduled entry cancelled");
            self.transition(SignalPhase::Idle, ctx.timestamp);
            return;
        }

        let forced = self.pending.activate.take();
        let reached = match action {
            // Limit-order semantics: fill at the target or better.
            TradeAction::Long => price <= target_price,
            TradeAction::Short => price >= target_price,
        };

        if forced.is_some() || reached {
            match validate_levels(action, price, take_profit, stop_loss) {
                Ok(()) => {
                    let position = Position {
                        action,
                        entry_price: price,
                        take_profit,
                        stop_loss,
                        opened_at: ctx.timestamp,
                        original_take_profit_distance: (take_profit - price).abs(),
                        original_stop_loss_distance: (price - stop_loss).abs(),
                        partial_fills: Vec::new(),
                        breakeven_applied: false,
                    };
                    info!(
                        symbol = %self.cfg.symbol,
                        entry = price,
                        forced = forced.is_some(),
                        "scheduled entry filled"
                    );
                    self.last_entry_at = Some(ctx.timestamp);
                    self.transition(SignalPhase::Opened { position }, ctx.timestamp);
                }
                Err(msg) => {
                    // Price moved past a protective level while waiting;
                    // opening here would be born broken.
                    self.report_validation(msg);
                    self.transition(SignalPhase::Idle, ctx.timestamp);
                }
            }
        } else {
            self.bus.publish(
                Channel::SchedulePing,
                Event::Ping {
                    symbol: self.cfg.symbol.clone(),
                    phase: "scheduled",
                    timestamp: ctx.timestamp,
                },
            );
        }
    }

    fn tick_opened(&mut self, ctx: &TickContext, position: Position, price: f64) {
        if let Some(id) = self.pending.close.take() {
            debug!(symbol = %self.cfg.symbol, id = %id, "manual close applied");
            self.close_position(position, price, CloseReason::Manual, ctx.timestamp);
            return;
        }
        // First tick after open: position confirmed live.
        self.transition(SignalPhase::Active { position }, ctx.timestamp);
    }

    fn tick_active(&mut self, ctx: &TickContext, position: Position, price: f64) {
        if let Some(id) = self.pending.close.take() {
            debug!(symbol = %self.cfg.symbol, id = %id, "manual close applied");
            self.close_position(position, price, CloseReason::Manual, ctx.timestamp);
            return;
        }

        if ctx.timestamp - position.opened_at >= self.cfg.expires_after {
            self.close_position(position, price, CloseReason::TimeExpired, ctx.timestamp);
            return;
        }

        // Stop-loss is checked first: if a tick ever crosses both levels,
        // the conservative reading wins.
        let (sl_hit, tp_hit) = match position.action {
            TradeAction::Long => (price <= position.stop_loss, price >= position.take_profit),
            TradeAction::Short => (price >= position.stop_loss, price <= position.take_profit),
        };

        if sl_hit {
            let level = position.stop_loss;
            self.close_position(position, level, CloseReason::StopLoss, ctx.timestamp);
        } else if tp_hit {
            let level = position.take_profit;
            self.close_position(position, level, CloseReason::TakeProfit, ctx.timestamp);
        } else {
            self.bus.publish(
                Channel::ActivePing,
                Event::Ping {
                    symbol: self.cfg.symbol.clone(),
                    phase: "active",
                    timestamp: ctx.timestamp,
                },
            );
        }
    }

    fn close_position(
        &mut self,
        position: Position,
        close_price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) {
        let net_pnl = pnl::net_pnl(
            position.action,
            position.entry_price,
            close_price,
            self.cfg.quantity,
            &self.cfg.costs,
        );
        info!(
            symbol = %self.cfg.symbol,
            reason = %reason,
            close_price,
            net_pnl,
            "signal closed"
        );
        self.bus.publish(
            Channel::Performance,
            Event::Performance {
                symbol: self.cfg.symbol.clone(),
                reason,
                net_pnl,
            },
        );
        self.transition(
            SignalPhase::Closed {
                position,
                close_price,
                closed_at: now,
                reason,
            },
            now,
        );
    }

    fn transition(&mut self, next: SignalPhase, now: DateTime<Utc>) {
        debug!(
            symbol = %self.cfg.symbol,
            from = self.phase.name(),
            to = next.name(),
            "state transition"
        );
        self.phase = next;
        self.last_transition_at = Some(now);
    }

    fn throttled(&self, now: DateTime<Utc>) -> bool {
        match self.last_entry_at {
            Some(last) => now - last < self.cfg.throttle.as_duration(),
            None => false,
        }
    }

    fn report_validation(&self, message: String) {
        warn!(symbol = %self.cfg.symbol, %message, "validation failed; signal unchanged");
        self.bus.publish(
            Channel::Error,
            Event::Error {
                symbol: self.cfg.symbol.clone(),
                message,
            },
        );
    }

    /// Commits evaluate "current price" at the last evaluated tick, which
    /// keeps them deterministic in backtests and mode-agnostic in general.
    fn commit_as_of(&self) -> Result<DateTime<Utc>> {
        self.last_tick_at
            .ok_or_else(|| Error::Validation("no tick has been evaluated yet".into()))
    }

    fn open_position_mut(&mut self) -> Option<&mut Position> {
        match &mut self.phase {
            SignalPhase::Opened { position } | SignalPhase::Active { position } => Some(position),
            _ => None,
        }
    }

    // ── Commit operations ────────────────────────────────────────────────

    pub async fn commit_partial_profit(&mut self, fraction: f64) -> Result<()> {
        self.commit_partial(fraction, FillDirection::Profit).await
    }

    pub async fn commit_partial_loss(&mut self, fraction: f64) -> Result<()> {
        self.commit_partial(fraction, FillDirection::Loss).await
    }

    async fn commit_partial(&mut self, fraction: f64, direction: FillDirection) -> Result<()> {
        if !(fraction > 0.0 && fraction <= 100.0) {
            return Err(Error::Validation(format!(
                "partial fill fraction {fraction} outside (0, 100]"
            )));
        }
        let as_of = self.commit_as_of()?;
        let price = self.oracle.average_price(&self.cfg.symbol, as_of).await?;
        let symbol = self.cfg.symbol.clone();
        let bus = self.bus.clone();

        let Some(position) = self.open_position_mut() else {
            return Err(Error::Validation("no open position for partial fill".into()));
        };

        let toward_target = match (position.action, direction) {
            (TradeAction::Long, FillDirection::Profit) => price > position.entry_price,
            (TradeAction::Long, FillDirection::Loss) => price < position.entry_price,
            (TradeAction::Short, FillDirection::Profit) => price < position.entry_price,
            (TradeAction::Short, FillDirection::Loss) => price > position.entry_price,
        };
        if !toward_target {
            debug!(%symbol, ?direction, "partial fill skipped; price not moving toward target");
            return Ok(());
        }

        if position.filled_fraction() + fraction > 100.0 + 1e-9 {
            return Err(Error::Validation(format!(
                "cumulative partial fills would exceed 100% ({:.2}% already filled)",
                position.filled_fraction()
            )));
        }

        let fill = PartialFill {
            fraction,
            price,
            timestamp: as_of,
            direction,
        };
        position.partial_fills.push(fill.clone());

        let channel = match direction {
            FillDirection::Profit => Channel::PartialProfit,
            FillDirection::Loss => Channel::PartialLoss,
        };
        bus.publish(channel, Event::PartialFill { symbol, fill });
        Ok(())
    }

    /// Move the stop to entry plus a buffer covering round-trip costs, once
    /// unrealized profit covers those costs. Idempotent.
    pub async fn commit_breakeven(&mut self) -> Result<()> {
        let as_of = self.commit_as_of()?;
        let price = self.oracle.average_price(&self.cfg.symbol, as_of).await?;
        let costs = self.cfg.costs;
        let symbol = self.cfg.symbol.clone();
        let bus = self.bus.clone();

        let Some(position) = self.open_position_mut() else {
            return Err(Error::Validation("no open position for breakeven".into()));
        };
        if position.breakeven_applied {
            return Ok(());
        }

        let buffer = position.entry_price * costs.round_trip_pct() / 100.0;
        let covered = match position.action {
            TradeAction::Long => price >= position.entry_price + buffer,
            TradeAction::Short => price <= position.entry_price - buffer,
        };
        if !covered {
            debug!(%symbol, "breakeven skipped; profit does not cover round-trip costs");
            return Ok(());
        }

        position.stop_loss = match position.action {
            TradeAction::Long => position.entry_price + buffer,
            TradeAction::Short => position.entry_price - buffer,
        };
        position.breakeven_applied = true;
        info!(%symbol, stop_loss = position.stop_loss, "breakeven applied");
        bus.publish(
            Channel::Breakeven,
            Event::Breakeven {
                symbol,
                stop_loss: position.stop_loss,
            },
        );
        Ok(())
    }

    /// Re-derive the stop from `current_price` and the original distance,
    /// widened by `shift_pct`. Applied only when strictly more protective
    /// than the current stop — repeated calls can only ever tighten.
    pub fn commit_trailing_stop(&mut self, shift_pct: f64, current_price: f64) -> Result<()> {
        let symbol = self.cfg.symbol.clone();
        let bus = self.bus.clone();
        let Some(position) = self.open_position_mut() else {
            return Err(Error::Validation("no open position for trailing stop".into()));
        };

        let distance = position.original_stop_loss_distance * (1.0 + shift_pct / 100.0);
        if distance <= 0.0 {
            return Err(Error::Validation(format!(
                "trailing stop shift {shift_pct}% collapses the stop distance"
            )));
        }

        let candidate = match position.action {
            TradeAction::Long => current_price - distance,
            TradeAction::Short => current_price + distance,
        };
        let more_protective = match position.action {
            TradeAction::Long => candidate > position.stop_loss,
            TradeAction::Short => candidate < position.stop_loss,
        };
        if !more_protective {
            debug!(%symbol, candidate, current = position.stop_loss, "trailing stop skipped; would loosen");
            return Ok(());
        }

        position.stop_loss = candidate;
        bus.publish(Channel::TrailingStop, Event::Trailing { symbol, level: candidate });
        Ok(())
    }

    /// Symmetric for take-profit: only ever moves the target closer to
    /// entry, never farther away.
    pub fn commit_trailing_take(&mut self, shift_pct: f64, current_price: f64) -> Result<()> {
        let symbol = self.cfg.symbol.clone();
        let bus = self.bus.clone();
        let Some(position) = self.open_position_mut() else {
            return Err(Error::Validation("no open position for trailing take".into()));
        };

        let distance = position.original_take_profit_distance * (1.0 + shift_pct / 100.0);
        if distance <= 0.0 {
            return Err(Error::Validation(format!(
                "trailing take shift {shift_pct}% collapses the take distance"
            )));
        }

        let candidate = match position.action {
            TradeAction::Long => current_price + distance,
            TradeAction::Short => current_price - distance,
        };
        let more_conservative = match position.action {
            TradeAction::Long => {
                candidate < position.take_profit && candidate > position.entry_price
            }
            TradeAction::Short => {
                candidate > position.take_profit && candidate < position.entry_price
            }
        };
        if !more_conservative {
            debug!(%symbol, candidate, current = position.take_profit, "trailing take skipped");
            return Ok(());
        }

        position.take_profit = candidate;
        bus.publish(Channel::TrailingTake, Event::Trailing { symbol, level: candidate });
        Ok(())
    }

    /// Force-close with reason `manual` on the next tick. Does not halt the
    /// strategy loop.
    pub fn commit_close_pending(&mut self, close_id: Option<String>) -> Result<()> {
        if !self.phase.is_open() {
            return Err(Error::Validation("no pending or open signal to close".into()));
        }
        let id = close_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(symbol = %self.cfg.symbol, id = %id, "manual close requested");
        self.pending.close = Some(id);
        Ok(())
    }

    /// Cancel a scheduled (not yet filled) entry on the next tick.
    pub fn commit_cancel_scheduled(&mut self, cancel_id: Option<String>) -> Result<()> {
        if !matches!(self.phase, SignalPhase::Scheduled { .. }) {
            return Err(Error::Validation("no scheduled signal to cancel".into()));
        }
        let id = cancel_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(symbol = %self.cfg.symbol, id = %id, "scheduled cancel requested");
        self.pending.cancel = Some(id);
        Ok(())
    }

    /// Fill a scheduled entry on the next tick, ahead of the price trigger.
    pub fn commit_activate_scheduled(&mut self, activate_id: Option<String>) -> Result<()> {
        if !matches!(self.phase, SignalPhase::Scheduled { .. }) {
            return Err(Error::Validation("no scheduled signal to activate".into()));
        }
        let id = activate_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(symbol = %self.cfg.symbol, id = %id, "scheduled activation requested");
        self.pending.activate = Some(id);
        Ok(())
    }
}

/// TP above entry above SL for longs, mirrored for shorts, everything
/// positive. Returns the violation as a message for the error channel.
fn validate_levels(
    action: TradeAction,
    entry: f64,
    take_profit: f64,
    stop_loss: f64,
) -> std::result::Result<(), String> {
    if entry <= 0.0 || take_profit <= 0.0 || stop_loss <= 0.0 {
        return Err(format!(
            "prices must be positive (entry {entry}, tp {take_profit}, sl {stop_loss})"
        ));
    }
    let ordered = match action {
        TradeAction::Long => take_profit > entry && entry > stop_loss,
        TradeAction::Short => take_profit < entry && entry < stop_loss,
    };
    if !ordered {
        return Err(format!(
            "{action} ordering violated (entry {entry}, tp {take_profit}, sl {stop_loss})"
        ));
    }
    Ok(())
}

fn protective_levels(action: TradeAction, entry: f64, intent: &EntryIntent) -> (f64, f64) {
    match action {
        TradeAction::Long => (
            entry * (1.0 + intent.take_profit_pct / 100.0),
            entry * (1.0 - intent.stop_loss_pct / 100.0),
        ),
        TradeAction::Short => (
            entry * (1.0 - intent.take_profit_pct / 100.0),
            entry * (1.0 + intent.stop_loss_pct / 100.0),
        ),
    }
}

fn build_position(
    intent: &EntryIntent,
    entry_price: f64,
    now: DateTime<Utc>,
) -> std::result::Result<Position, String> {
    let (take_profit, stop_loss) = protective_levels(intent.action, entry_price, intent);
    validate_levels(intent.action, entry_price, take_profit, stop_loss)?;
    Ok(Position {
        action: intent.action,
        entry_price,
        take_profit,
        stop_loss,
        opened_at: now,
        original_take_profit_distance: (take_profit - entry_price).abs(),
        original_stop_loss_distance: (entry_price - stop_loss).abs(),
        partial_fills: Vec::new(),
        breakeven_applied: false,
    })
}

/// Cloneable handle sharing one tracker between its tick loop and external
/// commit callers. A tick holds the lock for its entire evaluation, so no
/// two ticks for a symbol ever interleave and commits serialize with ticks.
#[derive(Clone)]
pub struct SignalHandle {
    inner: Arc<Mutex<SignalTracker>>,
}

impl SignalHandle {
    pub fn new(tracker: SignalTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    pub async fn tick(&self, ctx: &TickContext) -> Result<Signal> {
        self.inner.lock().await.tick(ctx).await
    }

    pub async fn snapshot(&self) -> Signal {
        self.inner.lock().await.snapshot()
    }

    pub async fn restore(&self, signal: Signal) {
        self.inner.lock().await.restore(signal);
    }

    pub async fn commit_partial_profit(&self, fraction: f64) -> Result<()> {
        self.inner.lock().await.commit_partial_profit(fraction).await
    }

    pub async fn commit_partial_loss(&self, fraction: f64) -> Result<()> {
        self.inner.lock().await.commit_partial_loss(fraction).await
    }

    pub async fn commit_breakeven(&self) -> Result<()> {
        self.inner.lock().await.commit_breakeven().await
    }

    pub async fn commit_trailing_stop(&self, shift_pct: f64, current_price: f64) -> Result<()> {
        self.inner
            .lock()
            .await
            .commit_trailing_stop(shift_pct, current_price)
    }

    pub async fn commit_trailing_take(&self, shift_pct: f64, current_price: f64) -> Result<()> {
        self.inner
            .lock()
            .await
            .commit_trailing_take(shift_pct, current_price)
    }

    pub async fn commit_close_pending(&self, close_id: Option<String>) -> Result<()> {
        self.inner.lock().await.commit_close_pending(close_id)
    }

    pub async fn commit_cancel_scheduled(&self, cancel_id: Option<String>) -> Result<()> {
        self.inner.lock().await.commit_cancel_scheduled(cancel_id)
    }

    pub async fn commit_activate_scheduled(&self, activate_id: Option<String>) -> Result<()> {
        self.inner.lock().await.commit_activate_scheduled(activate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use replay::ReplayClient;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct FixedStrategy {
        intent: StdMutex<Option<EntryIntent>>,
    }

    impl FixedStrategy {
        fn new(intent: Option<EntryIntent>) -> Arc<Self> {
            Arc::new(Self {
                intent: StdMutex::new(intent),
            })
        }

        fn set(&self, intent: Option<EntryIntent>) {
            *self.intent.lock().unwrap() = intent;
        }
    }

    #[async_trait]
    impl Strategy for FixedStrategy {
        fn name(&self) -> &str {
            "fixed"
        }

        fn symbol(&self) -> &str {
            "BTCUSDT"
        }

        async fn evaluate(&self, _ctx: &TickContext, _price: f64) -> Option<EntryIntent> {
            self.intent.lock().unwrap().clone()
        }
    }

    fn long_market(tp_pct: f64, sl_pct: f64) -> EntryIntent {
        EntryIntent {
            action: TradeAction::Long,
            mode: EntryMode::Market,
            take_profit_pct: tp_pct,
            stop_loss_pct: sl_pct,
        }
    }

    fn base_time() -> DateTime<Utc> {
        "2024-01-01T12:00:00Z".parse().unwrap()
    }

    struct Harness {
        client: Arc<ReplayClient>,
        strategy: Arc<FixedStrategy>,
        tracker: SignalTracker,
    }

    impl Harness {
        fn new(intent: Option<EntryIntent>, throttle: Interval, max_notional: f64) -> Self {
            let client = Arc::new(ReplayClient::new());
            let strategy = FixedStrategy::new(intent);
            let cfg = TrackerConfig {
                symbol: "BTCUSDT".into(),
                strategy_name: "fixed".into(),
                exchange_name: "replay".into(),
                frame_name: "test".into(),
                throttle,
                costs: Costs::default(),
                quantity: 1.0,
                max_notional,
                expires_after: Duration::hours(24),
            };
            let tracker = SignalTracker::new(
                cfg,
                strategy.clone(),
                Arc::new(PriceOracle::new(client.clone())),
                Arc::new(EventBus::new()),
            );
            Self {
                client,
                strategy,
                tracker,
            }
        }

        async fn tick_at(&mut self, price: f64, at: DateTime<Utc>) -> Signal {
            self.client.set_price("BTCUSDT", price, at).await;
            let ctx = TickContext {
                symbol: "BTCUSDT".into(),
                timestamp: at,
                backtest: true,
            };
            self.tracker.tick(&ctx).await.unwrap()
        }
    }

    fn minutes(n: i64) -> DateTime<Utc> {
        base_time() + Duration::minutes(n)
    }

    #[tokio::test]
    async fn market_entry_opens_then_activates() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);

        let s = h.tick_at(100.0, minutes(0)).await;
        assert!(matches!(s.phase, SignalPhase::Opened { .. }), "{:?}", s.phase);
        let position = s.phase.position().unwrap();
        assert!((position.take_profit - 110.0).abs() < 1e-9);
        assert!((position.stop_loss - 95.0).abs() < 1e-9);

        let s = h.tick_at(100.0, minutes(1)).await;
        assert!(matches!(s.phase, SignalPhase::Active { .. }));
    }

    #[tokio::test]
    async fn invalid_levels_leave_signal_idle() {
        // Negative take-profit distance puts tp below entry for a long.
        let mut h = Harness::new(Some(long_market(-5.0, 5.0)), Interval::M1, f64::MAX);
        let s = h.tick_at(100.0, minutes(0)).await;
        assert!(matches!(s.phase, SignalPhase::Idle));
    }

    #[tokio::test]
    async fn out_of_order_tick_leaves_state_untouched() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(1)).await;

        // Rewound clock: no activation, no close, nothing.
        let s = h.tick_at(200.0, minutes(0)).await;
        assert!(matches!(s.phase, SignalPhase::Opened { .. }));
    }

    #[tokio::test]
    async fn risk_cap_blocks_entry() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, 50.0);
        let s = h.tick_at(100.0, minutes(0)).await;
        assert!(matches!(s.phase, SignalPhase::Idle));
    }

    #[tokio::test]
    async fn take_profit_closes_at_the_level() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        h.tick_at(100.0, minutes(1)).await;

        let s = h.tick_at(115.0, minutes(2)).await;
        match s.phase {
            SignalPhase::Closed {
                close_price, reason, ..
            } => {
                assert_eq!(reason, CloseReason::TakeProfit);
                // Close price is the level, not the tick price past it.
                assert!((close_price - 110.0).abs() < 1e-9);
            }
            other => panic!("expected closed, got {other:?}"),
        }

        // The tick after a close frees the symbol again.
        h.strategy.set(None);
        let s = h.tick_at(115.0, minutes(3)).await;
        assert!(matches!(s.phase, SignalPhase::Idle));
    }

    #[tokio::test]
    async fn stop_loss_wins_when_a_tick_crosses_both_levels() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        h.tick_at(100.0, minutes(1)).await;

        // Trail the stop above the original take-profit, then tick between
        // the two: both levels are crossed at once.
        h.tracker.commit_trailing_stop(0.0, 150.0).unwrap();
        let s = h.tick_at(120.0, minutes(2)).await;
        match s.phase {
            SignalPhase::Closed { reason, close_price, .. } => {
                assert_eq!(reason, CloseReason::StopLoss);
                assert!((close_price - 145.0).abs() < 1e-9);
            }
            other => panic!("expected closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_signal_expires_after_the_frame_lifetime() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        h.tick_at(100.0, minutes(1)).await;

        let s = h.tick_at(100.0, base_time() + Duration::hours(25)).await;
        match s.phase {
            SignalPhase::Closed { reason, .. } => assert_eq!(reason, CloseReason::TimeExpired),
            other => panic!("expected closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn throttle_suppresses_reentry_within_the_interval() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::H1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        h.tracker.commit_close_pending(None).unwrap();
        h.tick_at(100.0, minutes(1)).await;

        // Strategy still wants in, but the hourly throttle says no.
        let s = h.tick_at(100.0, minutes(2)).await;
        assert!(matches!(s.phase, SignalPhase::Idle));
        let s = h.tick_at(100.0, minutes(30)).await;
        assert!(matches!(s.phase, SignalPhase::Idle));

        let s = h.tick_at(100.0, minutes(61)).await;
        assert!(matches!(s.phase, SignalPhase::Opened { .. }));
    }

    #[tokio::test]
    async fn manual_close_applies_on_the_next_tick() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        h.tracker.commit_close_pending(None).unwrap();
        let s = h.tick_at(100.0, minutes(1)).await;
        match s.phase {
            SignalPhase::Closed { reason, .. } => assert_eq!(reason, CloseReason::Manual),
            other => panic!("expected closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_pending_requires_an_open_signal() {
        let mut h = Harness::new(None, Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        let err = h.tracker.commit_close_pending(None).unwrap_err();
        assert!(err.is_validation(), "{err:?}");
    }

    #[tokio::test]
    async fn limit_entry_schedules_then_fills_at_target() {
        let intent = EntryIntent {
            action: TradeAction::Long,
            mode: EntryMode::Limit { target_price: 90.0 },
            take_profit_pct: 10.0,
            stop_loss_pct: 5.0,
        };
        let mut h = Harness::new(Some(intent), Interval::M1, f64::MAX);

        let s = h.tick_at(100.0, minutes(0)).await;
        assert!(matches!(s.phase, SignalPhase::Scheduled { .. }), "{:?}", s.phase);

        // Still above target: waits.
        let s = h.tick_at(95.0, minutes(1)).await;
        assert!(matches!(s.phase, SignalPhase::Scheduled { .. }));

        let s = h.tick_at(89.0, minutes(2)).await;
        let position = s.phase.position().expect("filled position");
        assert!((position.entry_price - 89.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scheduled_entry_can_be_cancelled() {
        let intent = EntryIntent {
            action: TradeAction::Long,
            mode: EntryMode::Limit { target_price: 90.0 },
            take_profit_pct: 10.0,
            stop_loss_pct: 5.0,
        };
        let mut h = Harness::new(Some(intent), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        h.tracker.commit_cancel_scheduled(None).unwrap();
        h.strategy.set(None);
        let s = h.tick_at(100.0, minutes(1)).await;
        assert!(matches!(s.phase, SignalPhase::Idle));
    }

    #[tokio::test]
    async fn scheduled_entry_can_be_force_activated() {
        let intent = EntryIntent {
            action: TradeAction::Long,
            mode: EntryMode::Limit { target_price: 90.0 },
            take_profit_pct: 20.0,
            stop_loss_pct: 10.0,
        };
        let mut h = Harness::new(Some(intent), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        h.tracker.commit_activate_scheduled(None).unwrap();
        let s = h.tick_at(100.0, minutes(1)).await;
        let position = s.phase.position().expect("forced fill");
        // Fills at the tick price, with the levels scheduled off the target.
        assert!((position.entry_price - 100.0).abs() < 1e-9);
        assert!((position.take_profit - 108.0).abs() < 1e-9);
        assert!((position.stop_loss - 81.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn partial_fills_accumulate_and_cap_at_full_size() {
        let mut h = Harness::new(Some(long_market(20.0, 10.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        h.tick_at(105.0, minutes(1)).await;

        h.tracker.commit_partial_profit(60.0).await.unwrap();
        let err = h.tracker.commit_partial_profit(50.0).await.unwrap_err();
        assert!(err.is_validation(), "{err:?}");

        // Price is above entry, so a loss-side fill is a silent no-op.
        h.tracker.commit_partial_loss(10.0).await.unwrap();

        let s = h.tracker.snapshot();
        let position = s.phase.position().unwrap();
        assert!((position.filled_fraction() - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn partial_fill_fraction_must_be_in_range() {
        let mut h = Harness::new(Some(long_market(20.0, 10.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        assert!(h.tracker.commit_partial_profit(0.0).await.is_err());
        assert!(h.tracker.commit_partial_profit(100.5).await.is_err());
    }

    #[tokio::test]
    async fn breakeven_moves_stop_once_profit_covers_costs() {
        let mut h = Harness::new(Some(long_market(20.0, 10.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        // Default costs: 0.1% fee + 0.1% slippage per leg = 0.4% round trip.
        h.tick_at(100.1, minutes(1)).await;
        h.tracker.commit_breakeven().await.unwrap();
        let sl = h.tracker.snapshot().phase.position().unwrap().stop_loss;
        assert!((sl - 90.0).abs() < 1e-9, "not yet covered, stop untouched");

        h.tick_at(101.0, minutes(2)).await;
        h.tracker.commit_breakeven().await.unwrap();
        let sl = h.tracker.snapshot().phase.position().unwrap().stop_loss;
        assert!((sl - 100.4).abs() < 1e-9, "got {sl}");

        // Idempotent: a later call at a higher price leaves the stop alone.
        h.tick_at(110.0, minutes(3)).await;
        h.tracker.commit_breakeven().await.unwrap();
        let sl = h.tracker.snapshot().phase.position().unwrap().stop_loss;
        assert!((sl - 100.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn trailing_stop_only_ever_tightens() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        // Original distance is 5: stop trails to price - 5.
        h.tracker.commit_trailing_stop(0.0, 104.0).unwrap();
        let sl = h.tracker.snapshot().phase.position().unwrap().stop_loss;
        assert!((sl - 99.0).abs() < 1e-9);

        // Price pulls back: the looser candidate is ignored.
        h.tracker.commit_trailing_stop(0.0, 102.0).unwrap();
        let sl = h.tracker.snapshot().phase.position().unwrap().stop_loss;
        assert!((sl - 99.0).abs() < 1e-9);

        // A widened shift trails farther behind but still from the
        // original distance, never compounding previous shifts.
        h.tracker.commit_trailing_stop(20.0, 110.0).unwrap();
        let sl = h.tracker.snapshot().phase.position().unwrap().stop_loss;
        assert!((sl - 104.0).abs() < 1e-9, "got {sl}");
    }

    #[tokio::test]
    async fn trailing_take_only_moves_toward_entry() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;

        // tp 110, original distance 10. From price 95 the candidate 105
        // sits between entry and the current target: accepted.
        h.tracker.commit_trailing_take(-50.0, 100.0).unwrap();
        let tp = h.tracker.snapshot().phase.position().unwrap().take_profit;
        assert!((tp - 105.0).abs() < 1e-9, "got {tp}");

        // A candidate beyond the current target is ignored.
        h.tracker.commit_trailing_take(0.0, 100.0).unwrap();
        let tp = h.tracker.snapshot().phase.position().unwrap().take_profit;
        assert!((tp - 105.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn restore_resumes_the_persisted_phase() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        h.tick_at(100.0, minutes(0)).await;
        let persisted = h.tracker.snapshot();

        let mut fresh = Harness::new(Some(long_market(10.0, 5.0)), Interval::M1, f64::MAX);
        fresh.tracker.restore(persisted.clone());
        assert_eq!(fresh.tracker.snapshot().phase.name(), persisted.phase.name());

        // The restored position keeps ticking where the old process stopped.
        let s = fresh.tick_at(100.0, minutes(1)).await;
        assert!(matches!(s.phase, SignalPhase::Active { .. }));
    }

    #[tokio::test]
    async fn restore_of_a_settled_signal_does_not_throttle_the_next_entry() {
        let mut h = Harness::new(Some(long_market(10.0, 5.0)), Interval::H1, f64::MAX);
        // The last transition was a settle (idle), not an entry, so the
        // hourly throttle must not delay the first entry after restart.
        h.tracker.restore(Signal {
            symbol: "BTCUSDT".into(),
            strategy_name: "fixed".into(),
            exchange_name: "replay".into(),
            frame_name: "test".into(),
            phase: SignalPhase::Idle,
            last_transition_at: Some(minutes(0)),
        });

        let s = h.tick_at(100.0, minutes(1)).await;
        assert!(matches!(s.phase, SignalPhase::Opened { .. }), "{:?}", s.phase);
    }
}
