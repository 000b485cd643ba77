use chrono::{DateTime, Utc};

use common::{CloseReason, Completion, PartialFill, Signal};

/// Named delivery channels. Each gets its own ordered queue (`lib.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every emitted signal snapshot, both modes.
    Signal,
    SignalBacktest,
    SignalLive,
    Error,
    FatalError,
    RiskRejection,
    /// Net PNL on every close.
    Performance,
    PartialProfit,
    PartialLoss,
    Breakeven,
    TrailingStop,
    TrailingTake,
    /// Emitted on every tick spent in the scheduled phase.
    SchedulePing,
    /// Emitted on every tick spent in the active phase.
    ActivePing,
    WalkerProgress,
    WalkerComplete,
    Done,
    DoneBacktest,
    DoneLive,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Signal => "signal",
            Channel::SignalBacktest => "signal-backtest",
            Channel::SignalLive => "signal-live",
            Channel::Error => "error",
            Channel::FatalError => "fatal-error",
            Channel::RiskRejection => "risk-rejection",
            Channel::Performance => "performance",
            Channel::PartialProfit => "partial-profit",
            Channel::PartialLoss => "partial-loss",
            Channel::Breakeven => "breakeven",
            Channel::TrailingStop => "trailing-stop",
            Channel::TrailingTake => "trailing-take",
            Channel::SchedulePing => "schedule-ping",
            Channel::ActivePing => "active-ping",
            Channel::WalkerProgress => "walker-progress",
            Channel::WalkerComplete => "walker-complete",
            Channel::Done => "done",
            Channel::DoneBacktest => "done-backtest",
            Channel::DoneLive => "done-live",
        }
    }
}

/// Payloads carried over the channels.
#[derive(Debug, Clone)]
pub enum Event {
    Signal(Signal),
    Error {
        symbol: String,
        message: String,
    },
    Fatal {
        symbol: String,
        message: String,
    },
    RiskRejection {
        symbol: String,
        notional: f64,
        reason: String,
    },
    Performance {
        symbol: String,
        reason: CloseReason,
        net_pnl: f64,
    },
    PartialFill {
        symbol: String,
        fill: PartialFill,
    },
    Breakeven {
        symbol: String,
        stop_loss: f64,
    },
    /// New stop/take level after a trailing adjustment.
    Trailing {
        symbol: String,
        level: f64,
    },
    Ping {
        symbol: String,
        phase: &'static str,
        timestamp: DateTime<Utc>,
    },
    WalkerProgress {
        strategy_name: String,
        index: usize,
        total: usize,
    },
    WalkerComplete {
        total: usize,
    },
    Done(Completion),
}
